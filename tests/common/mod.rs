//! Shared test helpers: a scripted in-memory backend and a recording sink.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tether::client::backend::Backend;
use tether::client::errors::ApiError;
use tether::client::responses::{
    CheckoutRequest, CheckoutResponse, ConnectedDevicesResponse, ConnectionStatus,
    ConnectionStatusResponse, DisconnectRequest, DisconnectResponse, GenerateCodeRequest,
    GenerateCodeResponse,
};
use tether::config::EntitlementConfig;
use tether::devices::{DeviceInfo, DeviceSession, DeviceSessionRegistry};
use tether::entitlement::{EntitlementMonitor, EntitlementState};
use tether::errors::{TetherError, TetherResult};
use tether::identity::{Identity, SessionIdentity};
use tether::notice::{Notice, NoticeSink};

pub const ACCOUNT_ID: &str = "acct-1";
pub const ID_TOKEN: &str = "token-1";
pub const HARDWARE_ID: &str = "hw-test";

/// A scripted answer. `Http` becomes an `ApiError` with that status.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Http(u16, String),
}

impl<T> Reply<T> {
    pub fn http(status: u16, message: &str) -> Self {
        Reply::Http(status, message.to_string())
    }

    fn into_result(self) -> TetherResult<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Http(status, message) => {
                Err(TetherError::Api(ApiError::new(Some(status), message)))
            }
        }
    }
}

/// Queued replies, then `fallback` forever.
struct Script<T> {
    queue: VecDeque<Reply<T>>,
    fallback: Reply<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Reply<T>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Reply<T> {
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GenerateCode {
        id_token: String,
        account_id: String,
        display_name: String,
    },
    ConnectionStatus(String),
    ConnectedDevices(String),
    Disconnect(String),
    VerifyEntitlement(String),
    VerifyCheckout(String),
}

pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    generate_code: Mutex<Script<GenerateCodeResponse>>,
    connection_status: Mutex<Script<ConnectionStatusResponse>>,
    /// Scripted failures for the device list; when empty the live list is
    /// returned.
    device_list_failures: Mutex<VecDeque<Reply<ConnectedDevicesResponse>>>,
    devices: Mutex<Vec<DeviceSession>>,
    disconnect: Mutex<HashMap<String, Reply<DisconnectResponse>>>,
    disconnect_delay: Mutex<Duration>,
    generate_delay: Mutex<Duration>,
    status_delay: Mutex<Duration>,
    entitlement: Mutex<Script<EntitlementState>>,
    checkout: Mutex<Script<CheckoutResponse>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            generate_code: Mutex::new(Script::new(Reply::Ok(code_response(
                "482913",
                Some(300),
            )))),
            connection_status: Mutex::new(Script::new(Reply::Ok(status(
                ConnectionStatus::Pending,
            )))),
            device_list_failures: Mutex::new(VecDeque::new()),
            devices: Mutex::new(Vec::new()),
            disconnect: Mutex::new(HashMap::new()),
            disconnect_delay: Mutex::new(Duration::ZERO),
            generate_delay: Mutex::new(Duration::ZERO),
            status_delay: Mutex::new(Duration::ZERO),
            entitlement: Mutex::new(Script::new(Reply::Ok(trial(14)))),
            checkout: Mutex::new(Script::new(Reply::Ok(checkout_ok()))),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn generate_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::GenerateCode { .. }))
    }

    pub fn status_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::ConnectionStatus(_)))
    }

    pub fn list_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::ConnectedDevices(_)))
    }

    pub fn disconnect_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Disconnect(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn entitlement_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::VerifyEntitlement(_)))
    }

    pub fn checkout_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::VerifyCheckout(_)))
    }

    pub fn set_generate_code(&self, reply: Reply<GenerateCodeResponse>) {
        self.generate_code.lock().unwrap().fallback = reply;
    }

    pub fn set_generate_delay(&self, delay: Duration) {
        *self.generate_delay.lock().unwrap() = delay;
    }

    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    pub fn set_connection_status(&self, reply: Reply<ConnectionStatusResponse>) {
        self.connection_status.lock().unwrap().fallback = reply;
    }

    pub fn queue_connection_status(&self, reply: Reply<ConnectionStatusResponse>) {
        self.connection_status.lock().unwrap().queue.push_back(reply);
    }

    pub fn set_devices(&self, ids: &[&str]) {
        *self.devices.lock().unwrap() = ids.iter().map(|id| device(id)).collect();
    }

    pub fn devices(&self) -> Vec<DeviceSession> {
        self.devices.lock().unwrap().clone()
    }

    pub fn fail_device_list(&self, reply: Reply<ConnectedDevicesResponse>) {
        self.device_list_failures.lock().unwrap().push_back(reply);
    }

    pub fn set_disconnect(&self, session_id: &str, reply: Reply<DisconnectResponse>) {
        self.disconnect
            .lock()
            .unwrap()
            .insert(session_id.to_string(), reply);
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        *self.disconnect_delay.lock().unwrap() = delay;
    }

    pub fn set_entitlement(&self, reply: Reply<EntitlementState>) {
        self.entitlement.lock().unwrap().fallback = reply;
    }

    pub fn set_checkout(&self, reply: Reply<CheckoutResponse>) {
        self.checkout.lock().unwrap().fallback = reply;
    }

    pub fn queue_checkout(&self, reply: Reply<CheckoutResponse>) {
        self.checkout.lock().unwrap().queue.push_back(reply);
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn generate_code(
        &self,
        id_token: &str,
        request: &GenerateCodeRequest,
    ) -> TetherResult<GenerateCodeResponse> {
        self.record(Call::GenerateCode {
            id_token: id_token.to_string(),
            account_id: request.account_id.clone(),
            display_name: request.display_name.clone(),
        });

        let delay = *self.generate_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self.generate_code.lock().unwrap().next();
        reply.into_result()
    }

    async fn connection_status(&self, code: &str) -> TetherResult<ConnectionStatusResponse> {
        self.record(Call::ConnectionStatus(code.to_string()));

        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self.connection_status.lock().unwrap().next();
        reply.into_result()
    }

    async fn connected_devices(
        &self,
        _id_token: &str,
        account_id: &str,
    ) -> TetherResult<ConnectedDevicesResponse> {
        self.record(Call::ConnectedDevices(account_id.to_string()));

        let failure = self.device_list_failures.lock().unwrap().pop_front();
        if let Some(reply) = failure {
            return reply.into_result();
        }

        Ok(ConnectedDevicesResponse {
            success: true,
            devices: self.devices(),
            error: None,
        })
    }

    async fn disconnect_device(
        &self,
        _id_token: &str,
        request: &DisconnectRequest,
    ) -> TetherResult<DisconnectResponse> {
        self.record(Call::Disconnect(request.session_id.clone()));

        let delay = *self.disconnect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .disconnect
            .lock()
            .unwrap()
            .get(&request.session_id)
            .cloned()
            .unwrap_or(Reply::Ok(DisconnectResponse {
                success: true,
                error: None,
            }));

        if matches!(&reply, Reply::Ok(resp) if resp.success) {
            self.devices
                .lock()
                .unwrap()
                .retain(|d| d.session_id != request.session_id);
        }

        reply.into_result()
    }

    async fn verify_entitlement(&self, hardware_id: &str) -> TetherResult<EntitlementState> {
        self.record(Call::VerifyEntitlement(hardware_id.to_string()));
        let reply = self.entitlement.lock().unwrap().next();
        reply.into_result()
    }

    async fn verify_checkout(
        &self,
        _id_token: &str,
        request: &CheckoutRequest,
    ) -> TetherResult<CheckoutResponse> {
        self.record(Call::VerifyCheckout(request.session_id.clone()));
        let reply = self.checkout.lock().unwrap().next();
        reply.into_result()
    }
}

/// Keeps every notice it receives.
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Notice) -> bool) -> usize {
        self.notices.lock().unwrap().iter().filter(|n| pred(n)).count()
    }
}

impl NoticeSink for RecordingSink {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

// === Builders ===

pub fn identity() -> Identity {
    Identity::new(ACCOUNT_ID, ID_TOKEN)
}

pub fn signed_in() -> Arc<SessionIdentity> {
    Arc::new(SessionIdentity::new(Some(identity())))
}

pub fn signed_out() -> Arc<SessionIdentity> {
    Arc::new(SessionIdentity::new(None))
}

pub fn device(session_id: &str) -> DeviceSession {
    DeviceSession {
        session_id: session_id.to_string(),
        device_info: DeviceInfo {
            platform: Some("iPhone".to_string()),
            user_agent: Some("Mobile Safari".to_string()),
            name: None,
        },
        last_active_at: Some("2026-01-15T12:00:00Z".to_string()),
    }
}

pub fn code_response(code: &str, expires_in: Option<u64>) -> GenerateCodeResponse {
    GenerateCodeResponse {
        success: true,
        code: Some(code.to_string()),
        expires_in,
        existing: false,
        error: None,
    }
}

pub fn status(status: ConnectionStatus) -> ConnectionStatusResponse {
    ConnectionStatusResponse {
        success: true,
        status,
    }
}

pub fn trial(days: i64) -> EntitlementState {
    EntitlementState {
        has_access: true,
        days_remaining: Some(days),
        ..EntitlementState::default()
    }
}

pub fn no_access() -> EntitlementState {
    EntitlementState {
        has_access: false,
        days_remaining: Some(0),
        ..EntitlementState::default()
    }
}

pub fn checkout_ok() -> CheckoutResponse {
    CheckoutResponse {
        success: true,
        message: None,
        error: None,
    }
}

pub fn checkout_failed(message: &str) -> CheckoutResponse {
    CheckoutResponse {
        success: false,
        message: Some(message.to_string()),
        error: None,
    }
}

/// The collaborators every flow needs, wired to one fake backend.
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub identity: Arc<SessionIdentity>,
    pub sink: Arc<RecordingSink>,
    pub registry: Arc<DeviceSessionRegistry>,
    pub monitor: Arc<EntitlementMonitor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_identity(signed_in())
    }

    pub fn with_identity(identity: Arc<SessionIdentity>) -> Self {
        let backend = FakeBackend::new();
        let sink = RecordingSink::new();
        let registry = Arc::new(DeviceSessionRegistry::new(
            backend.clone(),
            identity.clone(),
            sink.clone(),
        ));
        let monitor = Arc::new(EntitlementMonitor::new(
            backend.clone(),
            registry.clone(),
            sink.clone(),
            &EntitlementConfig::default(),
        ));

        Self {
            backend,
            identity,
            sink,
            registry,
            monitor,
        }
    }
}
