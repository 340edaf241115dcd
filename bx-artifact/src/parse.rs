//! Counter-file parsers: the RX-side `dpdk-testpmd` stat log and the
//! TX-side key=value CSV files the sampling helper appends to.

use bx_types::SampleSeries;
use once_cell::sync::Lazy;
use regex::Regex;

static RX_PPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Rx-pps:\s+(\d+)\s+Rx-bps:\s+(\d+)").unwrap());
static TX_PPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Tx-pps:\s+(\d+)\s+Tx-bps:\s+(\d+)").unwrap());
static RX_ERRORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"RX-errors:\s+(\d+)").unwrap());
static RX_PACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"RX-packets:\s+(\d+)").unwrap());

/// Parses a `dpdk-testpmd` stat log into named series: `rx_pps`, `rx_bytes`,
/// `tx_pps`, `tx_bytes`, `rx_errors`, `rx_packets`. `rx_errors` and
/// `rx_packets` are zero-padded at the tail to match `rx_pps`'s length when
/// they trail behind it, mirroring the source parser's error-list handling.
pub fn parse_rx_log(text: &str) -> Vec<SampleSeries> {
    let mut rx_pps = Vec::new();
    let mut rx_bytes = Vec::new();
    let mut tx_pps = Vec::new();
    let mut tx_bytes = Vec::new();
    let mut rx_errors = Vec::new();
    let mut rx_packets = Vec::new();

    for line in text.lines() {
        if let Some(c) = RX_PPS.captures(line) {
            rx_pps.push(c[1].parse().unwrap_or(0));
            rx_bytes.push(c[2].parse::<i64>().unwrap_or(0) / 8);
        } else if let Some(c) = TX_PPS.captures(line) {
            tx_pps.push(c[1].parse().unwrap_or(0));
            tx_bytes.push(c[2].parse::<i64>().unwrap_or(0) / 8);
        } else if let Some(c) = RX_ERRORS.captures(line) {
            rx_errors.push(c[1].parse().unwrap_or(0));
        } else if let Some(c) = RX_PACKETS.captures(line) {
            rx_packets.push(c[1].parse().unwrap_or(0));
        }
    }

    let target_len = rx_pps.len();
    rx_errors.resize(rx_errors.len().max(target_len), 0);
    rx_packets.resize(rx_packets.len().max(target_len), 0);

    vec![
        SampleSeries::new("rx_pps", rx_pps),
        SampleSeries::new("rx_bytes", rx_bytes),
        SampleSeries::new("tx_pps", tx_pps),
        SampleSeries::new("tx_bytes", tx_bytes),
        SampleSeries::new("rx_errors", rx_errors),
        SampleSeries::new("rx_packets", rx_packets),
    ]
}

/// Parses one `timestamp,key=val,key=val,...` line format into a per-row
/// list of `(key, value)` pairs, skipping fields whose value doesn't parse
/// as an integer (logged, not fatal — pktgen emits the occasional float or
/// string field in these tables).
fn parse_kv_row(line: &str) -> Vec<(String, i64)> {
    let mut fields = Vec::new();
    for part in line.split(',').skip(1) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match value.trim().parse::<f64>() {
            Ok(v) => fields.push((key.trim().to_string(), v as i64)),
            Err(_) => log::debug!("skipping non-numeric field {key:?}={value:?} in kv csv row"),
        }
    }
    fields
}

/// Parses a full key=value CSV (one row per sample) into named series, one
/// per distinct key observed, optionally prefixing every key (used to turn
/// `port_stats.csv`'s raw `opackets`/`obytes` into the archive's
/// `port_opackets`/`port_obytes` names).
pub fn parse_kv_csv(text: &str, prefix: &str) -> Vec<SampleSeries> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: std::collections::HashMap<String, Vec<i64>> = std::collections::HashMap::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        for (key, value) in parse_kv_row(line) {
            let name = format!("{prefix}{key}");
            by_key.entry(name.clone()).or_insert_with(|| {
                order.push(name.clone());
                Vec::new()
            });
            by_key.get_mut(&name).unwrap().push(value);
        }
    }

    order.into_iter().map(|name| SampleSeries::new(name.clone(), by_key.remove(&name).unwrap_or_default())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_testpmd_log_lines() {
        let log = "\
Rx-pps: 100000 Rx-bps: 800000
Tx-pps: 100500 Tx-bps: 804000
RX-errors: 3
RX-packets: 99000
Rx-pps: 101000 Rx-bps: 808000
Tx-pps: 101200 Tx-bps: 809600
";
        let series = parse_rx_log(log);
        let by_name: std::collections::HashMap<_, _> = series.iter().map(|s| (s.name(), s.values())).collect();
        assert_eq!(by_name["rx_pps"], &[100000, 101000]);
        assert_eq!(by_name["rx_bytes"], &[100000, 101000]);
        assert_eq!(by_name["tx_pps"], &[100500, 101200]);
        assert_eq!(by_name["rx_errors"], &[3, 0]);
        assert_eq!(by_name["rx_packets"], &[99000, 0]);
    }

    #[test]
    fn empty_log_yields_empty_series() {
        let series = parse_rx_log("");
        assert!(series.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn parses_kv_csv_rows_preserving_key_order() {
        let csv = "\
2024-01-01T00:00:00,pkts_tx=1000,mbits_tx=12.5
2024-01-01T00:00:01,pkts_tx=1010,mbits_tx=12.6
";
        let series = parse_kv_csv(csv, "");
        assert_eq!(series[0].name(), "pkts_tx");
        assert_eq!(series[0].values(), &[1000, 1010]);
        assert_eq!(series[1].name(), "mbits_tx");
        assert_eq!(series[1].values(), &[12, 12]);
    }

    #[test]
    fn applies_prefix_to_every_key() {
        let csv = "2024-01-01T00:00:00,opackets=500,obytes=640000\n";
        let series = parse_kv_csv(csv, "port_");
        assert_eq!(series[0].name(), "port_opackets");
        assert_eq!(series[1].name(), "port_obytes");
    }

    #[test]
    fn skips_non_numeric_fields() {
        let csv = "2024-01-01T00:00:00,pkts_tx=1000,label=armed\n";
        let series = parse_kv_csv(csv, "");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name(), "pkts_tx");
    }
}
