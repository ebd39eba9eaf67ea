//! Boundaries to the engine's external collaborators.
//!
//! Each collaborator is an object-safe trait consumed through [`Services`].
//! Production deployments wire real adapters here; [`local`] provides
//! filesystem-backed implementations for development and tests.

use std::sync::Arc;

use crate::utils::SingleInit;

pub mod catalog;
pub mod crawler;
pub mod documents;
pub mod handles;
pub mod local;
pub mod search;
pub mod typecheck;

pub use self::{
    catalog::{ArchiveCatalog, ArchiveObject},
    crawler::{CrawlState, CrawlerService},
    documents::{DocumentReference, DocumentStore, MetadataDocument},
    handles::HandleService,
    search::SearchIndex,
    typecheck::{Judgement, TypeChecker, Verdict},
};

/// Error produced at a collaborator boundary.
///
/// Adapters speak many different protocols; the engine only ever needs the
/// failure's description, so the boundary error is a plain message carrier.
#[derive(Clone, Debug, Eq, Fail, PartialEq)]
#[fail(display = "{}", _0)]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new<S: Into<String>>(message: S) -> ServiceError {
        ServiceError(message.into())
    }
}

impl_from! { for ServiceError ;
    std::io::Error => |e| ServiceError(e.to_string()),
    minidom::Error => |e| ServiceError(e.to_string()),
}

/// The full set of collaborators the engine talks to.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn ArchiveCatalog>,
    pub documents: Arc<dyn DocumentStore>,
    pub checker: Arc<dyn TypeChecker>,
    pub handles: Arc<dyn HandleService>,
    pub crawler: Arc<dyn CrawlerService>,
    pub search: Arc<dyn SearchIndex>,
}

static SERVICES: SingleInit<Services> = SingleInit::uninit();

/// Register the collaborator set for this process.
///
/// Like the configuration, the set can only be registered once; later calls
/// return the first registration.
pub fn init(services: Services) -> &'static Services {
    SERVICES.get_or_init(|| services)
}

/// Get the registered collaborator set.
pub fn get() -> crate::Result<&'static Services> {
    SERVICES.get()
        .ok_or_else(|| failure::err_msg("Services are not initialized"))
}
