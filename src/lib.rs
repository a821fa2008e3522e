pub mod component;
pub mod components;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod github;
pub mod http_server;
pub mod logging;
pub mod registry;
pub mod storage;
pub mod store;
pub mod types;
pub mod verification;

pub use component::Component;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{ComponentError, Error, Result, StoreError};
pub use registry::ComponentRegistry;
pub use storage::Db;
pub use store::HookStore;
pub use types::{Delivery, Hook, Outcome, Params};
