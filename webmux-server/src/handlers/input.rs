//! Input and resize handlers
//!
//! Both are fire-and-forget on success; failures are reported per-message
//! so a misbehaving client cannot take the connection down.

use tracing::trace;

use super::{HandlerContext, HandlerResult};

impl HandlerContext {
    /// Forward raw input to the client's attached session
    pub async fn handle_input(&self, data: String) -> HandlerResult {
        trace!(client_id = %self.client_id, bytes = data.len(), "Input");

        match self.engine.input(self.client_id, data).await {
            Ok(()) => HandlerResult::NoResponse,
            Err(e) => Self::error_reply(&e),
        }
    }

    /// Resize the client's attached session
    pub async fn handle_resize(&self, cols: u16, rows: u16) -> HandlerResult {
        trace!(client_id = %self.client_id, cols, rows, "Resize");

        match self.engine.resize(self.client_id, cols, rows).await {
            Ok(()) => HandlerResult::NoResponse,
            Err(e) => Self::error_reply(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_context;
    use super::super::HandlerResult;
    use webmux_protocol::{ClientMessage, ErrorCode, ServerMessage};

    #[tokio::test]
    async fn test_resize_not_attached_is_protocol_error() {
        let (ctx, _events) = create_test_context();
        let result = ctx
            .route_message(ClientMessage::Resize { cols: 80, rows: 24 })
            .await;

        match result {
            HandlerResult::Response(ServerMessage::Error { code, .. }) => {
                assert_eq!(code, Some(ErrorCode::ProtocolError));
            }
            _ => panic!("Expected Error response"),
        }
    }
}
