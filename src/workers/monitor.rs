use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value as JsonValue};
use snmp2::{AsyncSession, Oid, Value};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::db::entities::device;
use crate::db::services::{device_service, metric_service, metric_service::NewSample};
use crate::dialect::VendorDialect;
use crate::workers::{CancelFlag, JobError};

// Standard MIB-II objects; the CPU load object is vendor-specific and
// comes from the dialect.
const OID_SYS_UPTIME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];
const OID_IF_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
const OID_IF_OPER_STATUS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
const OID_IF_IN_OCTETS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 10];
const OID_IF_OUT_OCTETS: &[u64] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 16];
// IEEE 802.1Q dot1qVlanStaticName
const OID_VLAN_STATIC_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 17, 7, 1, 4, 3, 1, 1];

#[derive(Clone, Debug)]
pub struct SubQueryFailure {
    pub name: &'static str,
    pub detail: String,
}

/// Outcome of one poll cycle. Polling is best-effort: whatever succeeded
/// is already stored by the time this is returned.
#[derive(Clone, Debug, Default)]
pub struct PollReport {
    pub reachable: bool,
    pub samples_stored: usize,
    pub sub_queries: usize,
    pub failures: Vec<SubQueryFailure>,
}

impl PollReport {
    /// True when not a single sub-query produced data.
    pub fn all_failed(&self) -> bool {
        self.sub_queries > 0 && self.failures.len() == self.sub_queries
    }
}

/// Polls one device: ICMP reachability, then CPU/uptime, the interface
/// table and the VLAN table over SNMP. Sub-queries fail independently;
/// good data is never discarded because a sibling query timed out.
pub async fn run_poll(
    db: &DatabaseConnection,
    device: &device::Model,
    community: String,
    dialect: &'static dyn VendorDialect,
    cfg: &ServerConfig,
    cancel: CancelFlag,
) -> Result<PollReport, JobError> {
    let per_query = Duration::from_secs(cfg.snmp_timeout_secs);
    let mut report = PollReport::default();
    let mut samples: Vec<NewSample> = Vec::new();

    // Reachability first; also keeps the registry's status column fresh.
    report.sub_queries += 1;
    match ping_device(&device.host, Duration::from_secs(cfg.ping_timeout_secs)).await {
        Ok(()) => report.reachable = true,
        Err(detail) => {
            report.failures.push(SubQueryFailure { name: "icmp_echo", detail });
        }
    }
    let status = if report.reachable { "online" } else { "offline" };
    device_service::set_device_status(db, device.id, status).await?;

    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let endpoint = format!("{}:{}", device.host, device.snmp_port);
    let session = timeout(per_query, AsyncSession::new_v2c(&endpoint, community.as_bytes(), 0)).await;
    let mut session = match session {
        Ok(Ok(s)) => Some(s),
        Ok(Err(e)) => {
            debug!(device_id = device.id, error = %e, "SNMP session setup failed.");
            None
        }
        Err(_) => None,
    };

    // cpu_load + uptime
    report.sub_queries += 1;
    match &mut session {
        Some(sess) => match fetch_system(sess, dialect, per_query).await {
            Ok((cpu, uptime)) => {
                if let Some(cpu) = cpu {
                    samples.push(NewSample { metric: "cpu_load_percent".into(), value: cpu });
                }
                if let Some(uptime) = uptime {
                    samples.push(NewSample { metric: "uptime_seconds".into(), value: uptime });
                }
            }
            Err(detail) => report.failures.push(SubQueryFailure { name: "system", detail }),
        },
        None => report.failures.push(SubQueryFailure {
            name: "system",
            detail: "no snmp session".into(),
        }),
    }

    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    // interface counters
    report.sub_queries += 1;
    match &mut session {
        Some(sess) => match fetch_interfaces(sess, cfg.snmp_max_interfaces, per_query).await {
            Ok(interfaces) if !interfaces.is_empty() => {
                samples.push(NewSample {
                    metric: "interface_counters".into(),
                    value: JsonValue::Array(interfaces),
                });
            }
            Ok(_) => report.failures.push(SubQueryFailure {
                name: "interface_table",
                detail: "interface walk returned no rows".into(),
            }),
            Err(detail) => {
                report.failures.push(SubQueryFailure { name: "interface_table", detail })
            }
        },
        None => report.failures.push(SubQueryFailure {
            name: "interface_table",
            detail: "no snmp session".into(),
        }),
    }

    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    // VLAN names
    report.sub_queries += 1;
    match &mut session {
        Some(sess) => match fetch_vlans(sess, per_query).await {
            Ok(vlans) if !vlans.is_empty() => {
                samples.push(NewSample {
                    metric: "vlan_membership".into(),
                    value: JsonValue::Array(vlans),
                });
            }
            Ok(_) => report.failures.push(SubQueryFailure {
                name: "vlan_table",
                detail: "vlan walk returned no rows".into(),
            }),
            Err(detail) => report.failures.push(SubQueryFailure { name: "vlan_table", detail }),
        },
        None => report.failures.push(SubQueryFailure {
            name: "vlan_table",
            detail: "no snmp session".into(),
        }),
    }

    // Whatever succeeded gets stored, atomically, even if siblings failed.
    if !samples.is_empty() {
        report.samples_stored = metric_service::insert_samples(db, device.id, Utc::now(), samples).await?;
        metric_service::prune_samples(db, device.id, cfg.metric_retention_per_device).await?;
    }

    if !report.failures.is_empty() {
        warn!(
            device_id = device.id,
            failed = report.failures.len(),
            total = report.sub_queries,
            "Poll finished with failed sub-queries."
        );
    }
    Ok(report)
}

async fn ping_device(host: &str, ping_timeout: Duration) -> Result<(), String> {
    let ip = resolve_host(host).await?;
    let payload = [0u8; 56];
    match timeout(ping_timeout, surge_ping::ping(ip, &payload)).await {
        Ok(Ok((_packet, rtt))) => {
            debug!(host, rtt_ms = rtt.as_millis() as u64, "ICMP echo reply.");
            Ok(())
        }
        Ok(Err(e)) => Err(format!("icmp error: {e}")),
        Err(_) => Err(format!("no echo reply within {}s", ping_timeout.as_secs())),
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| format!("resolve {host}: {e}"))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("no address for {host}"))
}

async fn fetch_system(
    session: &mut AsyncSession,
    dialect: &'static dyn VendorDialect,
    per_query: Duration,
) -> Result<(Option<JsonValue>, Option<JsonValue>), String> {
    let cpu = snmp_get(session, dialect.cpu_load_oid(), per_query).await?;
    let uptime = snmp_get(session, OID_SYS_UPTIME, per_query)
        .await?
        .map(|v| match v {
            // Timeticks are centiseconds.
            JsonValue::Number(n) => json!(n.as_u64().unwrap_or(0) / 100),
            other => other,
        });
    if cpu.is_none() && uptime.is_none() {
        return Err("system objects returned no data".into());
    }
    Ok((cpu, uptime))
}

async fn fetch_interfaces(
    session: &mut AsyncSession,
    max_rows: usize,
    per_query: Duration,
) -> Result<Vec<JsonValue>, String> {
    let descr = walk_column(session, OID_IF_DESCR, max_rows, per_query).await?;
    let oper = walk_column(session, OID_IF_OPER_STATUS, max_rows, per_query).await?;
    let in_octets = walk_column(session, OID_IF_IN_OCTETS, max_rows, per_query).await?;
    let out_octets = walk_column(session, OID_IF_OUT_OCTETS, max_rows, per_query).await?;

    Ok(assemble_interfaces(descr, oper, in_octets, out_octets))
}

async fn fetch_vlans(
    session: &mut AsyncSession,
    per_query: Duration,
) -> Result<Vec<JsonValue>, String> {
    // VLAN tables are small; 256 rows is plenty for an access switch.
    let names = walk_column(session, OID_VLAN_STATIC_NAME, 256, per_query).await?;
    Ok(names
        .into_iter()
        .map(|(vlan_id, name)| json!({ "vlan_id": vlan_id, "name": name }))
        .collect())
}

/// A single GET; `Ok(None)` when the agent answers with no usable value.
async fn snmp_get(
    session: &mut AsyncSession,
    oid_parts: &[u64],
    per_query: Duration,
) -> Result<Option<JsonValue>, String> {
    let oid = Oid::from(oid_parts).map_err(|_| "invalid oid".to_string())?;
    let mut pdu = timeout(per_query, session.get(&oid))
        .await
        .map_err(|_| format!("timeout querying {}", dotted(oid_parts)))?
        .map_err(|e| format!("get {}: {e}", dotted(oid_parts)))?;
    Ok(pdu.varbinds.next().and_then(|(_oid, value)| value_to_json(&value)))
}

/// Walks one table column with repeated GETNEXT until the subtree ends or
/// `max_rows` is reached. Returns (row index, value) pairs.
async fn walk_column(
    session: &mut AsyncSession,
    base: &[u64],
    max_rows: usize,
    per_query: Duration,
) -> Result<Vec<(u64, JsonValue)>, String> {
    let base_str = dotted(base);
    let mut cursor: Vec<u64> = base.to_vec();
    let mut rows = Vec::new();

    while rows.len() < max_rows {
        let oid = Oid::from(cursor.as_slice()).map_err(|_| "invalid oid".to_string())?;
        let mut pdu = timeout(per_query, session.getnext(&oid))
            .await
            .map_err(|_| format!("timeout walking {base_str}"))?
            .map_err(|e| format!("walk {base_str}: {e}"))?;

        let Some((next_oid, value)) = pdu.varbinds.next() else {
            break;
        };
        let next_str = next_oid.to_string();
        let Some(row) = row_index(&next_str, &base_str) else {
            break; // left the subtree
        };
        if let Some(json) = value_to_json(&value) {
            rows.push((row, json));
        }
        cursor = parse_dotted(&next_str)?;
    }
    Ok(rows)
}

fn dotted(parts: &[u64]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

fn parse_dotted(oid: &str) -> Result<Vec<u64>, String> {
    oid.split('.')
        .map(|p| p.parse::<u64>().map_err(|_| format!("bad oid component in {oid}")))
        .collect()
}

/// If `oid` lies under `base`, returns its final component (the row
/// index for the tables walked here).
fn row_index(oid: &str, base: &str) -> Option<u64> {
    let rest = oid.strip_prefix(base)?.strip_prefix('.')?;
    rest.rsplit('.').next()?.parse().ok()
}

fn value_to_json(value: &Value<'_>) -> Option<JsonValue> {
    match value {
        Value::Integer(i) => Some(json!(i)),
        Value::Counter32(c) => Some(json!(c)),
        Value::Unsigned32(u) => Some(json!(u)),
        Value::Counter64(c) => Some(json!(c)),
        Value::Timeticks(t) => Some(json!(t)),
        Value::OctetString(bytes) => {
            Some(json!(String::from_utf8_lossy(bytes).trim().to_string()))
        }
        _ => None,
    }
}

/// Joins the four walked columns on their row index into one JSON object
/// per interface; rows missing a description are dropped.
fn assemble_interfaces(
    descr: Vec<(u64, JsonValue)>,
    oper: Vec<(u64, JsonValue)>,
    in_octets: Vec<(u64, JsonValue)>,
    out_octets: Vec<(u64, JsonValue)>,
) -> Vec<JsonValue> {
    use std::collections::BTreeMap;

    let oper: BTreeMap<u64, JsonValue> = oper.into_iter().collect();
    let inb: BTreeMap<u64, JsonValue> = in_octets.into_iter().collect();
    let outb: BTreeMap<u64, JsonValue> = out_octets.into_iter().collect();

    descr
        .into_iter()
        .map(|(index, name)| {
            json!({
                "index": index,
                "descr": name,
                "oper_status": oper.get(&index).cloned().unwrap_or(JsonValue::Null),
                "in_octets": inb.get(&index).cloned().unwrap_or(JsonValue::Null),
                "out_octets": outb.get(&index).cloned().unwrap_or(JsonValue::Null),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_index_requires_subtree_membership() {
        assert_eq!(row_index("1.3.6.1.2.1.2.2.1.2.3", "1.3.6.1.2.1.2.2.1.2"), Some(3));
        assert_eq!(row_index("1.3.6.1.2.1.2.2.1.8.3", "1.3.6.1.2.1.2.2.1.2"), None);
        assert_eq!(row_index("1.3.6.1.2.1.2.2.1.2", "1.3.6.1.2.1.2.2.1.2"), None);
    }

    #[test]
    fn interfaces_join_on_row_index() {
        let joined = assemble_interfaces(
            vec![(1, json!("Gi0/1")), (2, json!("Gi0/2"))],
            vec![(1, json!(1))],
            vec![(1, json!(1024)), (2, json!(0))],
            vec![(1, json!(2048))],
        );
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0]["descr"], json!("Gi0/1"));
        assert_eq!(joined[0]["in_octets"], json!(1024));
        assert_eq!(joined[1]["oper_status"], JsonValue::Null);
    }

    #[test]
    fn report_all_failed_needs_every_sub_query_down() {
        let mut report = PollReport { sub_queries: 3, ..Default::default() };
        report.failures.push(SubQueryFailure { name: "system", detail: "x".into() });
        assert!(!report.all_failed());
        report.failures.push(SubQueryFailure { name: "interface_table", detail: "x".into() });
        report.failures.push(SubQueryFailure { name: "vlan_table", detail: "x".into() });
        assert!(report.all_failed());
    }
}
