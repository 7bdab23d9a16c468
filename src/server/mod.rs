mod tools;

pub use tools::{DocsServer, EntityDetailRequest, ListEntitiesRequest, ResolveEntityRequest, SearchRequest};
