//! Regex-based extractor for conntrack event lines.

use regex::Regex;

use super::{ConntrackEvent, ConntrackKind};
use crate::flow::FlowMeta;
use crate::protos::Protocol;
use crate::{FlowsightError, Result};

const IP_PORT_PATTERN: &str = r"src=(.*) dst=(.*) sport=(\d+) dport=(\d+)";

pub struct Parser {
    extractor: Regex,
}

impl Parser {
    pub fn new() -> Parser {
        let pattern = format!(
            r"\s*\[(NEW|UPDATE|DESTROY)\]\s+(tcp|udp).*{IP_PORT_PATTERN}.*{IP_PORT_PATTERN}.*"
        );
        Parser {
            extractor: Regex::new(&pattern).expect("conntrack pattern is valid"),
        }
    }

    /// Parses one line of the conntrack event stream. Lines that do not
    /// match the grammar are an error; callers drop them.
    pub fn parse_line(&self, line: &str) -> Result<ConntrackEvent> {
        let caps = self
            .extractor
            .captures(line)
            .ok_or(FlowsightError::ConntrackParse)?;

        let kind = match &caps[1] {
            "NEW" => ConntrackKind::New,
            "UPDATE" => ConntrackKind::Update,
            _ => ConntrackKind::Destroy,
        };

        let transport = match &caps[2] {
            "tcp" => Protocol::Tcp,
            _ => Protocol::Udp,
        };

        Ok(ConntrackEvent {
            kind,
            original: leg(transport, &caps[3], &caps[4], &caps[5], &caps[6])?,
            reply: leg(transport, &caps[7], &caps[8], &caps[9], &caps[10])?,
        })
    }
}

impl Default for Parser {
    fn default() -> Parser {
        Parser::new()
    }
}

fn leg(transport: Protocol, src: &str, dst: &str, sport: &str, dport: &str) -> Result<FlowMeta> {
    Ok(FlowMeta {
        transport,
        src: src.parse().map_err(|_| FlowsightError::ConntrackParse)?,
        dst: dst.parse().map_err(|_| FlowsightError::ConntrackParse)?,
        src_port: sport.parse().map_err(|_| FlowsightError::ConntrackParse)?,
        dst_port: dport.parse().map_err(|_| FlowsightError::ConntrackParse)?,
        icmp_type: 0,
        icmp_code: 0,
    })
}
