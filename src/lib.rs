// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Aura Copilot
//!
//! Task orchestration engine for a browser co-pilot.
//!
//! The engine repeatedly observes a page's interactive surface, asks a
//! language model for the next action and executes it, until the model
//! reports completion, the task's time limit runs out or retries are
//! exhausted.
//!
//! Page scanning and the concrete input primitives live on the host side.
//! The engine reaches them through the event bus ([`protocol`]) and the
//! [`surface::SurfaceDriver`] trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aura_copilot::{BridgeDriver, Engine, EngineConfig, EventBus, ModelClient, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus = EventBus::default();
//!     let driver = Arc::new(BridgeDriver::new(bus.clone()));
//!     let settings = Settings::default()
//!         .with_model("https://api.openai.com/v1", "sk-...", "gpt-4o-mini");
//!
//!     let engine = Engine::with_config(
//!         settings,
//!         Arc::new(ModelClient::new()),
//!         driver,
//!         EngineConfig::default(),
//!         bus,
//!     );
//!     let mut events = engine.subscribe();
//!
//!     engine.execute_task("open youtube", None).await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod agent;
pub mod config;
pub mod model;
pub mod page;
pub mod protocol;
pub mod settings;
pub mod surface;

#[cfg(test)]
mod testing;

pub use actions::{parse_action, Action, ActionError, ActionExecutor, ActionKind};
pub use agent::{
    AcceptError, ActionRecord, Engine, EngineConfig, RetryStrategy, TaskState,
};
pub use model::{DecisionMaker, ModelClient, ModelConfig, ModelError};
pub use page::{ObserverGateway, PageSnapshot};
pub use protocol::{EngineEvent, EventBus, GlobalTaskState, Inbound};
pub use settings::{Settings, SettingsUpdate};
pub use surface::{BridgeDriver, DriverReply, SurfaceDriver, SurfaceId};
