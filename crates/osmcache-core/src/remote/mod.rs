//! Remote geographic data service
//!
//! The mirror only needs two blocking calls from the remote side: fetch
//! one element (optionally with its children) and fetch everything
//! matching a [`Scope`]. Both answer with a [`FeedDocument`].

pub mod overpass;
pub mod scope;

use crate::error::RemoteError;
use crate::feed::FeedDocument;
use crate::models::ElementKind;

pub use overpass::OverpassClient;
pub use scope::{plan, Scope};

/// Read-only source of elements
pub trait RemoteSource {
    /// Fetch one element; with `recurse`, also its way nodes or relation members
    fn fetch_element(
        &self,
        kind: ElementKind,
        id: i64,
        recurse: bool,
    ) -> Result<FeedDocument, RemoteError>;

    /// Fetch every element matching `scope`
    fn fetch_scoped(&self, scope: &Scope) -> Result<FeedDocument, RemoteError>;
}

impl<T: RemoteSource + ?Sized> RemoteSource for std::rc::Rc<T> {
    fn fetch_element(
        &self,
        kind: ElementKind,
        id: i64,
        recurse: bool,
    ) -> Result<FeedDocument, RemoteError> {
        (**self).fetch_element(kind, id, recurse)
    }

    fn fetch_scoped(&self, scope: &Scope) -> Result<FeedDocument, RemoteError> {
        (**self).fetch_scoped(scope)
    }
}
