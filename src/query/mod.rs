//! Deferred Queries
//!
//! Builds composable query descriptors over an ordered sequence:
//!
//! - **Builder**: fluent, immutable [`Query`] chaining and terminal calls
//! - **Part**: operator tags, arguments and the shared part chain
//! - **Provider**: the execution contract a backend implements
//!
//! # Chaining
//!
//! Every operator call returns a new query; the receiver is untouched and
//! can be branched from freely. Arguments are native closures or text
//! expressions:
//!
//! ```rust
//! use querychain::{LocalProvider, PartArgument};
//! use serde_json::json;
//!
//! let provider = LocalProvider::from_json(json!([
//!     {"id": 1, "name": "QWE"},
//!     {"id": 2, "name": "ASD"},
//!     {"id": 3, "name": "ZXC"},
//! ]))
//! .unwrap();
//!
//! let base = provider.query();
//! let late = base.where_("x => x.id > 1");
//! let named = late.select(PartArgument::lambda(|x| x["name"].clone()));
//!
//! assert_eq!(base.count().unwrap(), 3);
//! assert_eq!(named.to_array().unwrap(), vec![json!("ASD"), json!("ZXC")]);
//! ```

mod builder;
mod error;
mod part;
mod provider;

pub use builder::{reconstruct, Counted, Grouping, Plain, Query, QueryIter, WithCount};
pub use error::{QueryError, QueryResult};
pub use part::{Callable, PartArgument, PartChain, QueryFunc, QueryPart};
pub use provider::{Execution, QueryProvider};
