//! The boundary to the host editor.
//!
//! The editor is reached through the [`HostUi`](ui::HostUi) trait. In the
//! subprocess deployment [`ChannelUi`](channel::ChannelUi) turns UI requests
//! into [`HostEvent`]s and the [`HostActor`] turns the editor's
//! [`HostMessage`]s into plugin operations on the [`PluginHost`].

pub mod actor;
pub mod channel;
pub mod events;
pub mod mock;
pub mod ui;

pub use actor::{HostActor, HostActorBuilder, PluginHost};
pub use channel::ChannelUi;
pub use events::{EventSender, HostEvent, HostMessage};
pub use ui::{HostUi, ProgressGuard, ProgressId, Severity};
