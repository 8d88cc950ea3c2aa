pub mod domain;
pub mod event;
pub mod server;
pub mod tunnel;

pub mod prelude {
    pub use super::domain::Entity as CloudflareDomain;
    pub use super::event::Entity as ServerEventLog;
    pub use super::server::Entity as UserServer;
    pub use super::tunnel::Entity as DockerTunnel;
}
