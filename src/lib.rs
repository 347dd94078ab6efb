//! DevSync workspace root.
//!
//! The services live under `backend/`; this package only hosts the
//! cross-service tests in `tests/`.
