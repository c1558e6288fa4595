//! HTTP handler modules, mirroring the teacher's flat `api::{feature}::handlers`
//! layout collapsed into one `handlers` module per surface.

pub mod chunked;
pub mod health;
pub mod ws;
