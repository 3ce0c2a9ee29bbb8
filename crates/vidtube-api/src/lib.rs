pub mod assets;
pub mod auth;
pub mod comments;
pub mod dashboard;
pub mod error;
pub mod extract;
pub mod likes;
pub mod media;
pub mod middleware;
pub mod playlists;
pub mod response;
pub mod routes;
pub mod session;
pub mod staging;
pub mod state;
pub mod subscriptions;
pub mod tweets;
pub mod users;
pub mod videos;

pub use routes::router;
