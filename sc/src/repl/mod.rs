//! Terminal front end for streamchat
//!
//! Wires a [`ChatController`] and a [`ReplSession`] to one event bus. The
//! session only talks to the bus; the controller owns the streaming client.

mod render;
mod session;

pub use render::Renderer;
pub use session::ReplSession;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use eyre::{Result, eyre};

use crate::config::Config;
use crate::controller::ChatController;
use crate::events::create_event_bus;
use crate::llm::{StreamingClient, create_client};

/// A running controller task plus the session that drives it
struct Frontend {
    session: ReplSession,
    shutdown: CancellationToken,
    controller: JoinHandle<StreamingClient>,
}

impl Frontend {
    fn start(config: &Config, session_id: &str) -> Result<Self> {
        debug!(%session_id, "Frontend::start: called");
        let bus = create_event_bus();
        let client = create_client(config, &bus)
            .map_err(|e| eyre!("Failed to create chat client: {}", e))?
            .with_session_id(session_id);

        let shutdown = CancellationToken::new();
        let controller = tokio::spawn(ChatController::new(client, bus.clone()).run(shutdown.clone()));

        let renderer = Renderer::stdout(config.chat.tags.as_slice());
        let session = ReplSession::new(bus, config.chat.bot_id.clone(), config.llm.model.clone(), renderer);

        Ok(Self {
            session,
            shutdown,
            controller,
        })
    }

    async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        let client = self.controller.await.map_err(|e| eyre!("Controller task failed: {}", e))?;
        info!(blocks = client.messages().len(), "Frontend::stop: session ended");
        Ok(())
    }
}

/// Run the interactive REPL
///
/// This is the main entry point for `sc chat`.
pub async fn run_interactive(config: &Config, session_id: &str) -> Result<()> {
    let mut frontend = Frontend::start(config, session_id)?;
    let result = frontend.session.run().await;
    frontend.stop().await?;
    result
}

/// Send a single prompt and print the streamed reply
///
/// This is the main entry point for `sc ask`.
pub async fn run_ask(config: &Config, session_id: &str, prompt: &str) -> Result<()> {
    let mut frontend = Frontend::start(config, session_id)?;
    let result = frontend.session.ask(prompt).await.map(|_| ());
    frontend.stop().await?;
    result
}
