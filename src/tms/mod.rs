pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::{DEFAULT_BASE_URL, HttpTmsClient, TmsClient};
pub use error::TmsError;
pub use mock::{MockCall, MockTms};
pub use types::{SourceDocument, TranslatedDocument};
