use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "docker_tunnels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub server_id: String,
    pub container_id: String,
    pub cloudflare_domain_id: String,
    pub subdomain: String,
    pub full_domain: String,
    pub container_port: i32,
    pub host_port: i32,
    pub tunnel_id: String,
    pub tunnel_secret: String,
    pub status: String, // "active" | "failed"
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
