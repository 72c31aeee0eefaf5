use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::{Node, NodeError};

/// Untyped entry point of one method: JSON params in, JSON result out.
pub type Handler = for<'a> fn(&'a Node, Value) -> BoxFuture<'a, Result<Value, NodeError>>;

macro_rules! handlers {
    ($($handler:ident => $method:ident),* $(,)?) => {
        $(
            fn $handler(node: &Node, params: Value) -> BoxFuture<'_, Result<Value, NodeError>> {
                Box::pin(async move {
                    let request = serde_json::from_value(params)
                        .map_err(|e| NodeError::InvalidRequest(e.to_string()))?;
                    Ok::<_, NodeError>(serde_json::to_value(node.$method(request).await?)?)
                })
            }
        )*
    };
}

handlers! {
    create_channel => create_channel,
    propose_install => propose_install,
    install => install,
    reject_install => reject_install,
    take_action => take_action,
    uninstall => uninstall,
    get_free_balance_state => get_free_balance_state,
    get_token_indexed_free_balance_states => get_token_indexed_free_balance_states,
    get_app_instance => get_app_instance,
    deposit => deposit,
    deploy_state_deposit_holder => deploy_state_deposit_holder,
}

/// Maps method names to handlers.
#[derive(Clone)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// A router serving every `chan_*` method of [Node].
    pub fn new() -> Self {
        let routes: [(&str, Handler); 11] = [
            ("chan_create", create_channel),
            ("chan_proposeInstall", propose_install),
            ("chan_install", install),
            ("chan_rejectInstall", reject_install),
            ("chan_takeAction", take_action),
            ("chan_uninstall", uninstall),
            ("chan_getFreeBalanceState", get_free_balance_state),
            (
                "chan_getTokenIndexedFreeBalanceStates",
                get_token_indexed_free_balance_states,
            ),
            ("chan_getAppInstance", get_app_instance),
            ("chan_deposit", deposit),
            ("chan_deployStateDepositHolder", deploy_state_deposit_holder),
        ];
        Self {
            handlers: routes
                .into_iter()
                .map(|(method, handler)| (method.to_string(), handler))
                .collect(),
        }
    }

    /// Add or replace the handler of `method`.
    pub fn with_handler(mut self, method: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub async fn dispatch(
        &self,
        node: &Node,
        method: &str,
        params: Value,
    ) -> Result<Value, NodeError> {
        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| NodeError::UnknownMethod(method.to_string()))?;
        debug!(method, "dispatch");
        handler(node, params).await
    }
}
