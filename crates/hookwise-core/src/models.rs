//! Core domain models and strongly-typed identifiers.
//!
//! Defines integrations, endpoints, events, deliveries, replay queue items,
//! and reconciliation runs, along with newtype ID wrappers for compile-time
//! type safety. Includes database serialization for the enum tags used across
//! the delivery pipeline.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// once created, and this ID follows them through ingestion, delivery,
/// replay, and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed integration identifier.
///
/// An integration is one producer configuration: a provider, its signing
/// secret, and the customer destination the events forward to. All records
/// in the system hang off an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegrationId(pub Uuid);

impl IntegrationId {
    /// Creates a new random integration ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntegrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntegrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for IntegrationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for IntegrationId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for IntegrationId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for IntegrationId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed endpoint identifier.
///
/// Each endpoint carries the mutable health state (circuit breaker, rolling
/// statistics) for one integration's destination URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    /// Creates a new random endpoint ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EndpointId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EndpointId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EndpointId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Webhook provider the integration receives events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Stripe-style provider: `Stripe-Signature` header with timestamped
    /// HMAC, event metadata in the payload body.
    Stripe,
    /// Shopify-style provider: base64 HMAC digest with topic and webhook id
    /// headers.
    Shopify,
    /// GitHub-style provider: `sha256=<hex>` digest with event and delivery
    /// headers.
    Github,
}

impl Provider {
    /// Stable string tag used in the database and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Shopify => "shopify",
            Self::Github => "github",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for Provider {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for Provider {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "stripe" => Ok(Self::Stripe),
            "shopify" => Ok(Self::Shopify),
            "github" => Ok(Self::Github),
            _ => Err(format!("invalid provider: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for Provider {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Lifecycle status of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    /// Accepting and forwarding events.
    Active,
    /// Ingestion rejected with 409 until reactivated.
    Paused,
    /// Configuration problem; ingestion rejected with 409.
    Error,
}

impl IntegrationStatus {
    /// Stable string tag used in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for IntegrationStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for IntegrationStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid integration status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for IntegrationStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Where an event entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Received on the ingestion endpoint.
    Webhook,
    /// Synthesized by the reconciliation job after a detected gap.
    Reconciliation,
}

impl EventSource {
    /// Stable string tag used in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Reconciliation => "reconciliation",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for EventSource {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventSource {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "webhook" => Ok(Self::Webhook),
            "reconciliation" => Ok(Self::Reconciliation),
            _ => Err(format!("invalid event source: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for EventSource {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Circuit breaker state machine.
///
/// Gates delivery per destination. State transitions:
///
/// ```text
/// Closed   -> Open      (5 consecutive failures, or window success < 50%)
/// Open     -> HalfOpen  (3 consecutive health-check successes)
/// HalfOpen -> Closed    (10 consecutive successes)
/// HalfOpen -> Open      (2 consecutive failures)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, deliveries proceed immediately.
    Closed,

    /// Probationary recovery; deliveries throttled to one per second.
    HalfOpen,

    /// Destination unhealthy; deliveries divert to the replay queue.
    Open,
}

impl CircuitState {
    /// Stable string tag used in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for CircuitState {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for CircuitState {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "closed" => Ok(Self::Closed),
            "half_open" => Ok(Self::HalfOpen),
            "open" => Ok(Self::Open),
            _ => Err(format!("invalid circuit state: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for CircuitState {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Terminal status of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Attempt recorded but outcome not yet final.
    Pending,
    /// Destination acknowledged with a 2xx.
    Delivered,
    /// Attempt failed.
    Failed,
    /// Abandoned after the retry and replay budgets were exhausted.
    DeadLetter,
}

impl DeliveryStatus {
    /// Stable string tag used in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Classification of a failed delivery attempt.
///
/// Drives both the retry decision and the circuit breaker: TLS and
/// connection failures are terminal for the attempt but trip the circuit
/// so the health prober takes over recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorType {
    /// Request deadline exceeded; retried once with a doubled timeout.
    Timeout,
    /// HTTP 5xx from the destination.
    ServerError,
    /// HTTP 429; retried after the `Retry-After` interval.
    RateLimit,
    /// TLS handshake or certificate failure. Not retried.
    Ssl,
    /// TCP connect or DNS resolution failure. Not retried.
    ConnectionRefused,
    /// Anything else, including unexpected 4xx responses.
    Unknown,
}

impl DeliveryErrorType {
    /// Stable string tag used in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::RateLimit => "rate_limit",
            Self::Ssl => "ssl",
            Self::ConnectionRefused => "connection_refused",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeliveryErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for DeliveryErrorType {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryErrorType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "timeout" => Ok(Self::Timeout),
            "server_error" => Ok(Self::ServerError),
            "rate_limit" => Ok(Self::RateLimit),
            "ssl" => Ok(Self::Ssl),
            "connection_refused" => Ok(Self::ConnectionRefused),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("invalid delivery error type: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryErrorType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Status of a replay queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Waiting in the queue for the next drain pass.
    Pending,
    /// Claimed by the replay engine; send in flight.
    Delivering,
    /// Delivered (or deduplicated) during replay.
    Delivered,
    /// Failed terminally during replay.
    Failed,
    /// Skipped after exhausting the per-item attempt budget. Never blocks
    /// later positions.
    Skipped,
}

impl ReplayStatus {
    /// Stable string tag used in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for ReplayStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ReplayStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "delivering" => Ok(Self::Delivering),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("invalid replay status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for ReplayStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A producer configuration.
///
/// Referenced by every downstream record; cannot be deleted while events
/// reference it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Integration {
    /// Unique identifier for this integration.
    pub id: IntegrationId,

    /// Owning account.
    pub owner_id: Uuid,

    /// Human-readable name.
    pub name: String,

    /// Which provider signs events for this integration.
    pub provider: Provider,

    /// Shared secret used to verify inbound signatures.
    pub signing_secret: String,

    /// Customer destination URL events forward to.
    pub destination_url: String,

    /// Lifecycle status; only `active` integrations accept events.
    pub status: IntegrationStatus,

    /// Credential for the provider's pull API, encrypted at rest.
    ///
    /// Opaque to this service: the decryption boundary (KMS/vault) lives
    /// outside the core. None disables reconciliation for the integration.
    pub reconciliation_credential: Option<String>,

    /// Whether events that failed signature verification are still
    /// forwarded. The validity flag is durable either way.
    pub forward_invalid_signature: bool,

    /// When this integration was created.
    pub created_at: DateTime<Utc>,

    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Per-destination health state, one row per integration.
///
/// The single point of contention for an integration: all mutations run
/// under a row-level lock (see the circuit breaker). Counters irrelevant to
/// the new state are reset on every transition, and `state_changed_at`
/// advances monotonically.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Endpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Integration this endpoint belongs to (1:1).
    pub integration_id: IntegrationId,

    /// Circuit breaker state.
    pub circuit_state: CircuitState,

    /// Rolling success percentage over the sliding window (0.0 to 100.0).
    pub success_rate: f64,

    /// Rolling average response time in milliseconds over the window.
    pub avg_response_ms: f64,

    /// Consecutive failed deliveries. Reset on success and on transition.
    pub consecutive_failures: i32,

    /// Consecutive successful deliveries. Reset on failure and on
    /// transition.
    pub consecutive_successes: i32,

    /// Consecutive successful health probes. Only meaningful while OPEN.
    pub consecutive_health_check_successes: i32,

    /// When the prober last probed this destination.
    pub last_health_check_at: Option<DateTime<Utc>>,

    /// When the circuit last changed state.
    pub state_changed_at: DateTime<Utc>,

    /// When this endpoint was created.
    pub created_at: DateTime<Utc>,

    /// When this endpoint was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A received notification. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Integration the event arrived on.
    pub integration_id: IntegrationId,

    /// Provider event type, e.g. `charge.succeeded` or `orders/create`.
    pub event_type: String,

    /// Structured payload. Unparseable bodies are stored as
    /// `{"raw": "<original text>"}` so nothing is dropped.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// Request headers captured at ingestion, keys lower-cased.
    pub headers: sqlx::types::Json<HashMap<String, String>>,

    /// When the event was accepted. Canonical arrival order.
    pub received_at: DateTime<Utc>,

    /// Whether the provider signature verified against the stored secret.
    pub signature_valid: bool,

    /// Provider-supplied event identifier, used for deduplication across
    /// the webhook and reconciliation paths.
    pub provider_event_id: Option<String>,

    /// Whether the event arrived as a webhook or was reconciled.
    pub source: EventSource,
}

impl WebhookEvent {
    /// Creates an event as accepted on the ingestion path.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: EventId,
        integration_id: IntegrationId,
        event_type: String,
        payload: serde_json::Value,
        headers: HashMap<String, String>,
        received_at: DateTime<Utc>,
        signature_valid: bool,
        provider_event_id: Option<String>,
    ) -> Self {
        Self {
            id,
            integration_id,
            event_type,
            payload: sqlx::types::Json(payload),
            headers: sqlx::types::Json(headers),
            received_at,
            signature_valid,
            provider_event_id,
            source: EventSource::Webhook,
        }
    }

    /// Creates an event synthesized by reconciliation.
    ///
    /// Reconciled events carry empty headers and are considered
    /// signature-valid since they were fetched over the provider API.
    pub fn reconciled(
        integration_id: IntegrationId,
        event_type: String,
        payload: serde_json::Value,
        provider_event_id: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            integration_id,
            event_type,
            payload: sqlx::types::Json(payload),
            headers: sqlx::types::Json(HashMap::new()),
            received_at,
            signature_valid: true,
            provider_event_id: Some(provider_event_id),
            source: EventSource::Reconciliation,
        }
    }

    /// Payload as the exact bytes forwarded to the destination.
    ///
    /// Serialization of the stored payload is the canonical body: the
    /// destination must observe it byte-for-byte.
    pub fn payload_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.payload.0).unwrap_or_default()
    }

    /// Headers as a plain map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers.0
    }
}

/// Audit record of one delivery attempt. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier for this attempt.
    pub id: Uuid,

    /// Event being delivered.
    pub event_id: EventId,

    /// Endpoint the attempt was gated by. Null only for events accepted
    /// before an endpoint existed.
    pub endpoint_id: Option<EndpointId>,

    /// Terminal status of the attempt.
    pub status: DeliveryStatus,

    /// HTTP status code, when a response was received.
    pub status_code: Option<i32>,

    /// Round-trip time in milliseconds, when a response was received.
    pub response_time_ms: Option<i32>,

    /// Response body truncated to 1024 bytes.
    pub response_body: Option<String>,

    /// Failure classification, when the attempt failed.
    pub error_type: Option<DeliveryErrorType>,

    /// Sequential attempt number for this event, 1-based.
    pub attempt_number: i32,

    /// When this attempt was made.
    pub attempted_at: DateTime<Utc>,

    /// When the scheduled retry fires, if one was scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// One slot in an endpoint's ordered replay buffer.
///
/// `position` uniquely orders pending items for an endpoint and equals
/// enqueue order, which equals arrival order.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReplayQueueItem {
    /// Unique identifier for this queue slot.
    pub id: Uuid,

    /// Endpoint whose queue this item sits in.
    pub endpoint_id: EndpointId,

    /// Event to replay.
    pub event_id: EventId,

    /// Monotonic position, strictly increasing per endpoint.
    pub position: i64,

    /// Groups related events of one business object for ordering. A hint,
    /// not an identity: dedup uses `provider_event_id`.
    pub correlation_key: Option<String>,

    /// Replay status of the item.
    pub status: ReplayStatus,

    /// How many replay passes have picked this item up.
    pub attempts: i32,

    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the item was delivered, if it was.
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Audit of one reconciliation pull cycle. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReconciliationRun {
    /// Unique identifier for this run.
    pub id: Uuid,

    /// Integration the cycle ran for.
    pub integration_id: IntegrationId,

    /// Events the provider API reported in the window.
    pub provider_events_found: i32,

    /// Matching local events found in the window.
    pub local_events_found: i32,

    /// Provider events with no local counterpart.
    pub gaps_detected: i32,

    /// Gaps successfully injected as reconciled events.
    pub gaps_resolved: i32,

    /// When the cycle ran.
    pub ran_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_tags_match_wire_format() {
        assert_eq!(Provider::Stripe.to_string(), "stripe");
        assert_eq!(Provider::Shopify.to_string(), "shopify");
        assert_eq!(Provider::Github.to_string(), "github");

        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(CircuitState::Open.to_string(), "open");

        assert_eq!(DeliveryErrorType::ConnectionRefused.to_string(), "connection_refused");
        assert_eq!(DeliveryErrorType::RateLimit.to_string(), "rate_limit");

        assert_eq!(ReplayStatus::Delivering.to_string(), "delivering");
        assert_eq!(EventSource::Reconciliation.to_string(), "reconciliation");
        assert_eq!(DeliveryStatus::DeadLetter.to_string(), "dead_letter");
    }

    #[test]
    fn payload_bytes_round_trip_exactly() {
        let payload = serde_json::json!({"id": "evt_1", "type": "charge.succeeded"});
        let event = WebhookEvent::new(
            EventId::new(),
            IntegrationId::new(),
            "charge.succeeded".to_string(),
            payload.clone(),
            HashMap::new(),
            Utc::now(),
            true,
            Some("evt_1".to_string()),
        );

        let bytes = event.payload_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, payload);
        // Two serializations of the same stored payload are identical.
        assert_eq!(bytes, event.payload_bytes());
    }

    #[test]
    fn reconciled_events_are_marked_valid_with_empty_headers() {
        let event = WebhookEvent::reconciled(
            IntegrationId::new(),
            "orders/create".to_string(),
            serde_json::json!({"id": 42}),
            "shopify:order:42".to_string(),
            Utc::now(),
        );

        assert!(event.signature_valid);
        assert!(event.headers().is_empty());
        assert_eq!(event.source, EventSource::Reconciliation);
        assert_eq!(event.provider_event_id.as_deref(), Some("shopify:order:42"));
    }
}
