//! Integration tests: the full reconcile→bet cycle against an in-memory venue.

mod lifecycle;
mod mock_venue;
