use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::db::entities::device;
use crate::dialect;
use crate::services::encryption_service::SecretCipher;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("device {0} not found")]
    NotFound(i32),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("encryption error: {0}")]
    Crypto(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Input for registering a device. The password and community arrive in
/// plain text over the command API and are sealed before insertion.
#[derive(Clone, Debug, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub host: String,
    pub vendor: String,
    pub shell_username: String,
    pub shell_password: String,
    #[serde(default = "default_community")]
    pub snmp_community: String,
    #[serde(default = "default_snmp_port")]
    pub snmp_port: i32,
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_port() -> i32 {
    161
}

/// Partial update; `None` means "leave unchanged".
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub vendor: Option<String>,
    pub shell_username: Option<String>,
    pub shell_password: Option<String>,
    pub snmp_community: Option<String>,
    pub snmp_port: Option<i32>,
    pub enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceFilter {
    pub vendor: Option<String>,
    pub status: Option<String>,
    pub enabled: Option<bool>,
}

fn validate_new(spec: &NewDevice) -> Result<(), RegistryError> {
    if spec.name.trim().is_empty() {
        return Err(RegistryError::Validation("device name must not be empty".into()));
    }
    if spec.host.trim().is_empty() {
        return Err(RegistryError::Validation("device host must not be empty".into()));
    }
    if spec.shell_username.trim().is_empty() {
        return Err(RegistryError::Validation("shell username must not be empty".into()));
    }
    if !(1..=65535).contains(&spec.snmp_port) {
        return Err(RegistryError::Validation(format!(
            "snmp port {} out of range",
            spec.snmp_port
        )));
    }
    if dialect::dialect_for(&spec.vendor).is_none() {
        return Err(RegistryError::Validation(format!(
            "unknown vendor dialect '{}'",
            spec.vendor
        )));
    }
    Ok(())
}

pub async fn create_device(
    db: &DatabaseConnection,
    crypto: &SecretCipher,
    spec: NewDevice,
) -> Result<device::Model, RegistryError> {
    validate_new(&spec)?;

    let clash = device::Entity::find()
        .filter(device::Column::Deleted.eq(false))
        .filter(
            device::Column::Name
                .eq(spec.name.clone())
                .or(device::Column::Host.eq(spec.host.clone())),
        )
        .one(db)
        .await?;
    if clash.is_some() {
        return Err(RegistryError::Conflict(
            "device name or host already registered".into(),
        ));
    }

    let now = Utc::now();
    let model = device::ActiveModel {
        name: Set(spec.name.clone()),
        host: Set(spec.host.clone()),
        vendor: Set(spec.vendor),
        shell_username: Set(spec.shell_username),
        shell_password_enc: Set(crypto
            .seal(&spec.shell_password)
            .map_err(RegistryError::Crypto)?),
        snmp_community_enc: Set(crypto
            .seal(&spec.snmp_community)
            .map_err(RegistryError::Crypto)?),
        snmp_port: Set(spec.snmp_port),
        enabled: Set(true),
        deleted: Set(false),
        status: Set("unknown".to_string()),
        last_backup_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(device_id = model.id, name = %model.name, "Registered device.");
    Ok(model)
}

pub async fn get_device(
    db: &DatabaseConnection,
    device_id: i32,
) -> Result<Option<device::Model>, DbErr> {
    device::Entity::find_by_id(device_id).one(db).await
}

/// Like `get_device` but refuses deleted rows; used by dispatch paths.
pub async fn get_active_device(
    db: &DatabaseConnection,
    device_id: i32,
) -> Result<device::Model, RegistryError> {
    match get_device(db, device_id).await? {
        Some(d) if !d.deleted => Ok(d),
        _ => Err(RegistryError::NotFound(device_id)),
    }
}

pub async fn list_devices(
    db: &DatabaseConnection,
    filter: DeviceFilter,
) -> Result<Vec<device::Model>, DbErr> {
    let mut query = device::Entity::find().filter(device::Column::Deleted.eq(false));
    if let Some(vendor) = filter.vendor {
        query = query.filter(device::Column::Vendor.eq(vendor));
    }
    if let Some(status) = filter.status {
        query = query.filter(device::Column::Status.eq(status));
    }
    if let Some(enabled) = filter.enabled {
        query = query.filter(device::Column::Enabled.eq(enabled));
    }
    query.order_by_asc(device::Column::Name).all(db).await
}

pub async fn update_device(
    db: &DatabaseConnection,
    crypto: &SecretCipher,
    device_id: i32,
    update: DeviceUpdate,
) -> Result<device::Model, RegistryError> {
    let existing = get_device(db, device_id)
        .await?
        .filter(|d| !d.deleted)
        .ok_or(RegistryError::NotFound(device_id))?;

    if let Some(vendor) = &update.vendor {
        if dialect::dialect_for(vendor).is_none() {
            return Err(RegistryError::Validation(format!(
                "unknown vendor dialect '{vendor}'"
            )));
        }
    }
    if let Some(port) = update.snmp_port {
        if !(1..=65535).contains(&port) {
            return Err(RegistryError::Validation(format!("snmp port {port} out of range")));
        }
    }
    if matches!(&update.name, Some(n) if n.trim().is_empty())
        || matches!(&update.host, Some(h) if h.trim().is_empty())
    {
        return Err(RegistryError::Validation("name and host must not be empty".into()));
    }

    let mut active = existing.into_active_model();
    if let Some(name) = update.name {
        active.name = Set(name);
    }
    if let Some(host) = update.host {
        active.host = Set(host);
    }
    if let Some(vendor) = update.vendor {
        active.vendor = Set(vendor);
    }
    if let Some(user) = update.shell_username {
        active.shell_username = Set(user);
    }
    if let Some(password) = update.shell_password {
        active.shell_password_enc = Set(crypto.seal(&password).map_err(RegistryError::Crypto)?);
    }
    if let Some(community) = update.snmp_community {
        active.snmp_community_enc = Set(crypto.seal(&community).map_err(RegistryError::Crypto)?);
    }
    if let Some(port) = update.snmp_port {
        active.snmp_port = Set(port);
    }
    if let Some(enabled) = update.enabled {
        active.enabled = Set(enabled);
    }
    active.updated_at = Set(Utc::now());

    Ok(active.update(db).await?)
}

/// Soft delete: the device disappears from listings and scheduling but its
/// config versions and events remain queryable by id.
pub async fn remove_device(db: &DatabaseConnection, device_id: i32) -> Result<(), RegistryError> {
    let existing = get_device(db, device_id)
        .await?
        .filter(|d| !d.deleted)
        .ok_or(RegistryError::NotFound(device_id))?;

    let mut active = existing.into_active_model();
    active.deleted = Set(true);
    active.enabled = Set(false);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;

    info!(device_id, "Soft-deleted device.");
    Ok(())
}

pub async fn set_device_status(
    db: &DatabaseConnection,
    device_id: i32,
    status: &str,
) -> Result<(), DbErr> {
    device::Entity::update_many()
        .col_expr(device::Column::Status, Expr::value(status))
        .col_expr(device::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(device::Column::Id.eq(device_id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn touch_last_backup(
    db: &DatabaseConnection,
    device_id: i32,
    at: chrono::DateTime<Utc>,
) -> Result<(), DbErr> {
    device::Entity::update_many()
        .col_expr(device::Column::LastBackupAt, Expr::value(at))
        .col_expr(device::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(device::Column::Id.eq(device_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Opens the sealed shell credentials for a worker run.
pub fn open_shell_credentials(
    crypto: &SecretCipher,
    device: &device::Model,
) -> Result<(String, String), RegistryError> {
    let password = crypto
        .open(&device.shell_password_enc)
        .map_err(RegistryError::Crypto)?;
    Ok((device.shell_username.clone(), password))
}

pub fn open_snmp_community(
    crypto: &SecretCipher,
    device: &device::Model,
) -> Result<String, RegistryError> {
    crypto
        .open(&device.snmp_community_enc)
        .map_err(RegistryError::Crypto)
}
