//! Data store modules for Supabase integration

pub mod results;
pub mod supabase;

#[cfg(test)]
pub mod memory;

pub use results::{MatchResult, ParticipantStore, SupabaseParticipantStore};
pub use supabase::{SupabaseClient, SupabaseError};
