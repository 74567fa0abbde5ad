/// Vector and text index shadows.
///
/// Index-backed classes keep only a compact lite projection in their index:
/// the vector (or analyzed text), the columns used in filter expressions, and
/// a small metadata column. The authoritative entity lives in the KV under a
/// namespaced key `{collection}:{id}`; callers never form those keys
/// themselves and never see lite-only rows through the proxies.
///
/// The backing indexes are external collaborators behind the
/// [`VectorIndex`]/[`TextIndex`] traits; in-memory reference backends serve
/// tests and development the same way the in-memory KV does.
mod proxy;
mod text;
mod vector;

pub use proxy::{TextDualProxy, VectorDualProxy};
pub use text::{InMemoryTextIndex, TextIndex};
pub use vector::{InMemoryVectorIndex, VectorIndex, VectorSearchRequest};
