use async_trait::async_trait;

use crate::client::responses::{
    CheckoutRequest, CheckoutResponse, ConnectedDevicesResponse, ConnectionStatusResponse,
    DisconnectRequest, DisconnectResponse, GenerateCodeRequest, GenerateCodeResponse,
};
use crate::entitlement::EntitlementState;
use crate::errors::TetherResult;

/// The remote service the flows talk to.
///
/// Each method maps to exactly one endpoint. Implementations return
/// `Err` only for transport failures and non-2xx answers; a 2xx body with
/// `success: false` is handed back as-is so callers can classify it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /pairing/generate-code`
    async fn generate_code(
        &self,
        id_token: &str,
        request: &GenerateCodeRequest,
    ) -> TetherResult<GenerateCodeResponse>;

    /// `GET /pairing/connection-status/{code}`
    async fn connection_status(&self, code: &str) -> TetherResult<ConnectionStatusResponse>;

    /// `GET /pairing/connected-devices/{accountId}`
    async fn connected_devices(
        &self,
        id_token: &str,
        account_id: &str,
    ) -> TetherResult<ConnectedDevicesResponse>;

    /// `POST /pairing/disconnect-device`
    async fn disconnect_device(
        &self,
        id_token: &str,
        request: &DisconnectRequest,
    ) -> TetherResult<DisconnectResponse>;

    /// `GET /entitlement/verify?hardwareId=`
    async fn verify_entitlement(&self, hardware_id: &str) -> TetherResult<EntitlementState>;

    /// `POST /payments/verify-checkout`
    async fn verify_checkout(
        &self,
        id_token: &str,
        request: &CheckoutRequest,
    ) -> TetherResult<CheckoutResponse>;
}
