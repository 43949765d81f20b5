//! Component A — Tokens & Pricing.
//!
//! Pure, allocation-light functions: estimate how many tokens a piece of
//! content costs, look up a model's context window, and price a
//! `(model, usage)` tuple. Nothing here touches I/O; the tables are
//! static data the rest of the workspace treats as replaceable (spec.md
//! scopes the *content* of these tables as domain data, out of scope —
//! only the interfaces are specified).

mod encoding;
mod estimate;
mod limits;
mod pricing;

pub use encoding::{resolve_encoding_family, EncodingFamily};
pub use estimate::{estimate_tokens_value, CharTokenizer, Tokenizer, IMAGE_TOKEN_ESTIMATE};
pub use limits::get_context_limit;
pub use pricing::{estimate_cost, CacheMultipliers};
