use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use weft_core::{ActionError, ActionKind};

use crate::actions::{
    AuditLog, DeviceAction, Export, ExportFormat, Navigate, RequestAction, RunScript, ShowToast,
    Subscribe, ToggleModal, UpdateState,
};
use crate::context::ActionContext;

/// Executes the main action of one handler.
///
/// The returned value becomes the handler's result: it is mapped, written
/// to state and handed to the success sub-handlers.
#[async_trait]
pub trait ActionStrategy: Send + Sync {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError>;
}

/// Lookup table from action kind to strategy.
#[derive(Clone)]
pub struct StrategyTable {
    strategies: HashMap<ActionKind, Arc<dyn ActionStrategy>>,
}

impl std::fmt::Debug for StrategyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.strategies.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("StrategyTable").field("kinds", &kinds).finish()
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl StrategyTable {
    /// A table with the built-in strategy for every action kind.
    pub fn standard() -> Self {
        Self {
            strategies: ActionKind::ALL
                .into_iter()
                .map(|kind| (kind, standard_strategy(kind)))
                .collect(),
        }
    }

    /// Replace the strategy for `kind`.
    pub fn register(&mut self, kind: ActionKind, strategy: Arc<dyn ActionStrategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn get(&self, kind: ActionKind) -> Option<&Arc<dyn ActionStrategy>> {
        self.strategies.get(&kind)
    }
}

fn standard_strategy(kind: ActionKind) -> Arc<dyn ActionStrategy> {
    match kind {
        ActionKind::Navigation => Arc::new(Navigate),
        ActionKind::OpenModal => Arc::new(ToggleModal { open: true }),
        ActionKind::CloseModal => Arc::new(ToggleModal { open: false }),
        ActionKind::UpdateState => Arc::new(UpdateState),
        ActionKind::RunScript => Arc::new(RunScript),
        ActionKind::Toast => Arc::new(ShowToast),
        ActionKind::ApiCall
        | ActionKind::CrudCreate
        | ActionKind::CrudRead
        | ActionKind::CrudUpdate
        | ActionKind::CrudDelete
        | ActionKind::AiGenerate
        | ActionKind::Graphql
        | ActionKind::GraphqlMutation => Arc::new(RequestAction),
        ActionKind::GraphqlSubscription => Arc::new(Subscribe),
        ActionKind::AuditLog => Arc::new(AuditLog),
        ActionKind::ExportCsv => Arc::new(Export(ExportFormat::Csv)),
        ActionKind::ExportJson => Arc::new(Export(ExportFormat::Json)),
        ActionKind::VoiceCommand
        | ActionKind::InitiateCall
        | ActionKind::WalletConnect
        | ActionKind::WalletSign => Arc::new(DeviceAction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_strategy() {
        let table = StrategyTable::standard();
        for kind in ActionKind::ALL {
            assert!(table.get(kind).is_some(), "{kind}");
        }
    }

    #[test]
    fn strategies_can_be_replaced() {
        struct Fixed;

        #[async_trait]
        impl ActionStrategy for Fixed {
            async fn execute(&self, _cx: &ActionContext<'_>) -> Result<Value, ActionError> {
                Ok(Value::Bool(true))
            }
        }

        let mut table = StrategyTable::standard();
        let fixed: Arc<dyn ActionStrategy> = Arc::new(Fixed);
        table.register(ActionKind::Toast, Arc::clone(&fixed));
        assert!(Arc::ptr_eq(table.get(ActionKind::Toast).unwrap(), &fixed));
    }
}
