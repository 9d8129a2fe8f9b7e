//! # Handler chain
//!
//! Runs every handler's `before`, then handlers in order until one returns Stop, then every `after`
//! in reverse order. Any `before` returning false stops the chain.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::types::{Handler, HandlerResponse, Update};

/// Ordered list of handlers sharing one update.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler (runs in order; first Stop ends the handle phase).
    pub fn add_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    #[instrument(skip(self, update))]
    pub async fn handle(&self, update: &Update) -> Result<HandlerResponse> {
        let user_id = update.user_id();
        let mut final_response = HandlerResponse::Continue;

        info!(user_id, chat_id = ?update.chat_id(), "step: handler_chain started");

        for handler in &self.handlers {
            let name = std::any::type_name_of_val(handler.as_ref());
            if !handler.before(update).await? {
                info!(user_id, handler = %name, "step: before returned false, chain stopped");
                return Ok(HandlerResponse::Stop);
            }
        }

        for handler in &self.handlers {
            let name = std::any::type_name_of_val(handler.as_ref());
            let response = handler.handle(update).await?;
            debug!(handler = %name, response = ?response, "Handler processed");
            if response == HandlerResponse::Stop {
                info!(user_id, handler = %name, "step: handler chain stopped by handler");
                final_response = response;
                break;
            }
        }

        for handler in self.handlers.iter().rev() {
            handler.after(update, &final_response).await?;
        }

        info!(user_id, response = ?final_response, "step: handler_chain finished");
        Ok(final_response)
    }
}
