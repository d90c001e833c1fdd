use async_trait::async_trait;
use serde_json::Value;

use weft_core::ActionError;

use crate::context::ActionContext;
use crate::strategy::ActionStrategy;

/// `voice_command`, `initiate_call`, `wallet_connect`, `wallet_sign`:
/// forwarded to the host device bridge with resolved parameters.
#[derive(Debug, Clone, Copy)]
pub struct DeviceAction;

#[async_trait]
impl ActionStrategy for DeviceAction {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let kind = cx.handler().action;
        let params = cx.params();
        cx.dispatcher().devices.invoke(kind, &params).await
    }
}
