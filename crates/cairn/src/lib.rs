//! Cairn - Reflective memory and decision engine for AI agents
//!
//! Memories live in four layers and decay, consolidate and get pruned over
//! time. A structure analyzer and a dynamics tracker measure the knowledge
//! graph built from them, a policy optimizer turns those measurements into
//! retrieval and reflection decisions, and an actor-evaluator-reflector
//! pipeline turns agent outcomes into durable lessons.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod math;
pub mod memory;
pub mod reflection;
pub mod search;
pub mod storage;
pub mod testing;
pub mod text;
pub mod workers;

pub use config::Config;
pub use engine::{Cairn, CairnBuilder};
pub use error::{CairnError, Result};
