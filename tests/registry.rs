use chrono::Utc;

use switchvault::db;
use switchvault::db::services::config_service;
use switchvault::db::services::device_service::{
    self, DeviceFilter, DeviceUpdate, NewDevice, RegistryError,
};
use switchvault::db::services::event_service::{self, EventFilter, EventKind, NewEvent};
use switchvault::services::encryption_service::SecretCipher;
use switchvault::workers::JobKind;

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn crypto() -> SecretCipher {
    SecretCipher::from_hex_key(KEY).unwrap()
}

fn new_device(name: &str, host: &str) -> NewDevice {
    NewDevice {
        name: name.into(),
        host: host.into(),
        vendor: "cisco-ios".into(),
        shell_username: "admin".into(),
        shell_password: "secret".into(),
        snmp_community: "public".into(),
        snmp_port: 161,
    }
}

#[tokio::test]
async fn add_rejects_malformed_specs_before_any_write() {
    let db = db::connect_for_tests().await;
    let crypto = crypto();

    let mut missing_host = new_device("sw1", "");
    missing_host.host = "   ".into();
    let err = device_service::create_device(&db, &crypto, missing_host).await;
    assert!(matches!(err, Err(RegistryError::Validation(_))));

    let bad_vendor = NewDevice { vendor: "netgear-prosafe".into(), ..new_device("sw1", "10.0.0.2") };
    let err = device_service::create_device(&db, &crypto, bad_vendor).await;
    assert!(matches!(err, Err(RegistryError::Validation(_))));

    let bad_port = NewDevice { snmp_port: 0, ..new_device("sw1", "10.0.0.2") };
    let err = device_service::create_device(&db, &crypto, bad_port).await;
    assert!(matches!(err, Err(RegistryError::Validation(_))));

    assert!(device_service::list_devices(&db, DeviceFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn duplicate_name_or_host_conflicts() {
    let db = db::connect_for_tests().await;
    let crypto = crypto();

    device_service::create_device(&db, &crypto, new_device("sw1", "10.0.0.2"))
        .await
        .unwrap();

    let same_name = device_service::create_device(&db, &crypto, new_device("sw1", "10.0.0.3")).await;
    assert!(matches!(same_name, Err(RegistryError::Conflict(_))));

    let same_host = device_service::create_device(&db, &crypto, new_device("sw2", "10.0.0.2")).await;
    assert!(matches!(same_host, Err(RegistryError::Conflict(_))));
}

#[tokio::test]
async fn credentials_are_sealed_at_rest_and_open_for_workers() {
    let db = db::connect_for_tests().await;
    let crypto = crypto();

    let device = device_service::create_device(&db, &crypto, new_device("sw1", "10.0.0.2"))
        .await
        .unwrap();

    assert_ne!(device.shell_password_enc, "secret");
    assert_ne!(device.snmp_community_enc, "public");

    let (user, password) = device_service::open_shell_credentials(&crypto, &device).unwrap();
    assert_eq!(user, "admin");
    assert_eq!(password, "secret");
    assert_eq!(device_service::open_snmp_community(&crypto, &device).unwrap(), "public");
}

#[tokio::test]
async fn update_changes_only_requested_fields() {
    let db = db::connect_for_tests().await;
    let crypto = crypto();

    let device = device_service::create_device(&db, &crypto, new_device("sw1", "10.0.0.2"))
        .await
        .unwrap();

    let updated = device_service::update_device(
        &db,
        &crypto,
        device.id,
        DeviceUpdate { host: Some("10.0.0.9".into()), enabled: Some(false), ..Default::default() },
    )
    .await
    .unwrap();

    assert_eq!(updated.host, "10.0.0.9");
    assert!(!updated.enabled);
    assert_eq!(updated.name, "sw1");
    assert_eq!(updated.shell_password_enc, device.shell_password_enc);

    let err = device_service::update_device(
        &db,
        &crypto,
        device.id,
        DeviceUpdate { vendor: Some("unknown".into()), ..Default::default() },
    )
    .await;
    assert!(matches!(err, Err(RegistryError::Validation(_))));
}

#[tokio::test]
async fn soft_delete_hides_the_device_but_keeps_its_history() {
    let db = db::connect_for_tests().await;
    let crypto = crypto();

    let device = device_service::create_device(&db, &crypto, new_device("sw1", "10.0.0.2"))
        .await
        .unwrap();

    config_service::append_version(&db, device.id, "hostname sw1", Utc::now())
        .await
        .unwrap();
    event_service::record_event(
        &db,
        NewEvent {
            device_id: Some(device.id),
            job_kind: Some(JobKind::Backup),
            kind: EventKind::Success,
            detail: "stored configuration version 1".into(),
            duration_ms: Some(1200),
        },
    )
    .await
    .unwrap();

    device_service::remove_device(&db, device.id).await.unwrap();

    // Gone from listings...
    let listed = device_service::list_devices(&db, DeviceFilter::default()).await.unwrap();
    assert!(listed.is_empty());

    // ...but lineage is untouched.
    let history = config_service::version_history(&db, device.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    let events = event_service::query_events(
        &db,
        EventFilter { device_id: Some(device.id), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(events.len(), 1);

    // Removing again reports NotFound.
    let err = device_service::remove_device(&db, device.id).await;
    assert!(matches!(err, Err(RegistryError::NotFound(_))));
}
