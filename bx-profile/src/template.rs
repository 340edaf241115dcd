//! Profile-text templating is an external collaborator: the core only
//! needs to be able to ask for "a profile script for these parameters" and
//! get an opaque artifact back. This module renders the one template the
//! original generator used, kept deliberately thin — the real templating
//! (per-flow IP/port range math, the full Lua control script) lives outside
//! this crate's concerns; `generate_flow` depends only on the trait.

use bx_types::FlowMode;

/// Renders a generator script for one set of flow parameters.
pub trait Templater {
    fn render(&self, params: &ProfileParams) -> String;
}

/// Everything a templater needs to produce one profile script.
#[derive(Debug, Clone)]
pub struct ProfileParams {
    pub src_mac: String,
    pub dst_mac: String,
    pub base_src_ip: String,
    pub base_dst_ip: String,
    pub base_src_port: u16,
    pub base_dst_port: u16,
    pub percent_rate: u8,
    pub pkt_size: u32,
    pub num_flows: u32,
    pub flow_mode: FlowMode,
}

/// Renders the Lua control script the traffic generator loads with `-f`.
/// Only the fields that vary per-flow (IP/port increments, rate, packet
/// size) are templated; everything else is the fixed boilerplate the
/// generator expects on every run.
pub struct LuaPktgenTemplater;

impl Templater for LuaPktgenTemplater {
    fn render(&self, p: &ProfileParams) -> String {
        let ip_inc = "0.0.0.1";
        let zero_inc = "0.0.0.0";

        let src_ip_inc = if p.flow_mode.increments_src_ip() { ip_inc } else { zero_inc };
        let dst_ip_inc = if p.flow_mode.increments_dst_ip() { ip_inc } else { zero_inc };
        let src_port_inc = if p.flow_mode.increments_src_port() { 1 } else { 0 };
        let dst_port_inc = if p.flow_mode.increments_dst_port() { 1 } else { 0 };

        format!(
            "package.path = package.path .. \";?.lua;test/?.lua;app/?.lua;\"\n\
             require \"Pktgen\"\n\n\
             local function start()\n\
             \tpktgen.stop(0);\n\
             \tpktgen.set(\"all\", \"rate\", {rate});\n\
             \tpktgen.set(\"all\", \"size\", {pkt_size});\n\
             \tpktgen.set_mac(\"0\", \"dst\", \"{dst_mac}\");\n\
             \tpktgen.set_mac(\"0\", \"src\", \"{src_mac}\");\n\
             \tpktgen.range.dst_ip(\"0\", \"start\", \"{dst_ip}\");\n\
             \tpktgen.range.dst_ip(\"0\", \"inc\", \"{dst_ip_inc}\");\n\
             \tpktgen.range.src_ip(\"0\", \"start\", \"{src_ip}\");\n\
             \tpktgen.range.src_ip(\"0\", \"inc\", \"{src_ip_inc}\");\n\
             \tpktgen.range.dst_port(\"0\", \"start\", {dst_port});\n\
             \tpktgen.range.dst_port(\"0\", \"inc\", {dst_port_inc});\n\
             \tpktgen.range.src_port(\"0\", \"start\", {src_port});\n\
             \tpktgen.range.src_port(\"0\", \"inc\", {src_port_inc});\n\
             \tpktgen.range.size(\"0\", \"start\", {pkt_size});\n\
             \tpktgen.set_range(\"0\", \"on\");\n\
             \tpktgen.start(0);\n\
             end\n\n\
             start();\n",
            rate = p.percent_rate,
            pkt_size = p.pkt_size,
            dst_mac = p.dst_mac,
            src_mac = p.src_mac,
            dst_ip = p.base_dst_ip,
            dst_ip_inc = dst_ip_inc,
            src_ip = p.base_src_ip,
            src_ip_inc = src_ip_inc,
            dst_port = p.base_dst_port,
            dst_port_inc = dst_port_inc,
            src_port = p.base_src_port,
            src_port_inc = src_port_inc,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(flow_mode: FlowMode) -> ProfileParams {
        ProfileParams {
            src_mac: "02:00:00:00:00:01".to_string(),
            dst_mac: "02:00:00:00:00:02".to_string(),
            base_src_ip: "10.0.0.1".to_string(),
            base_dst_ip: "10.0.1.1".to_string(),
            base_src_port: 1024,
            base_dst_port: 2048,
            percent_rate: 50,
            pkt_size: 512,
            num_flows: 100,
            flow_mode,
        }
    }

    #[test]
    fn s_mode_increments_src_ip_only() {
        let script = LuaPktgenTemplater.render(&params(FlowMode::S));
        assert!(script.contains("src_ip\", \"inc\", \"0.0.0.1\""));
        assert!(script.contains("dst_ip\", \"inc\", \"0.0.0.0\""));
        assert!(script.contains("src_port\", \"inc\", 0"));
        assert!(script.contains("dst_port\", \"inc\", 0"));
    }

    #[test]
    fn sdpd_mode_increments_every_field() {
        let script = LuaPktgenTemplater.render(&params(FlowMode::Sdpd));
        assert!(script.contains("src_ip\", \"inc\", \"0.0.0.1\""));
        assert!(script.contains("dst_ip\", \"inc\", \"0.0.0.1\""));
        assert!(script.contains("dst_port\", \"inc\", 1"));
    }

    #[test]
    fn embeds_rate_and_size() {
        let script = LuaPktgenTemplater.render(&params(FlowMode::S));
        assert!(script.contains("\"rate\", 50"));
        assert!(script.contains("\"size\", 512"));
    }
}
