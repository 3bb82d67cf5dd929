//! shoter-api — Client for the game backend.
//!
//! Two JSON endpoints: `create-player-profile` registers a player from their
//! photos, `identify-player` matches one image against known players. HTTP 404
//! from identification is a domain result ("no such player"), not a failure.

pub mod client;
pub mod types;

pub use client::{ApiError, GameApi, HttpGameApi};
pub use types::{ApiResponse, FaceImageRequest, IdentifyResponse, PlayerProfileRequest};
