use anyhow::Result;
use crate::FcConfig;

pub fn check_link(fc: &FcConfig) -> Result<()> {
    if !fc.autodetect {
        let url = fc.url.as_deref().unwrap_or("");
        anyhow::ensure!(!url.is_empty(), "fc.url missing (autodetect=false)");
        let scheme = url.split(':').next().unwrap_or("");
        anyhow::ensure!(
            matches!(scheme, "udpin" | "udpout" | "udpbcast" | "tcpin" | "tcpout" | "serial"),
            "fc.url: unsupported scheme {:?}",
            scheme
        );
    } else if let Some(bauds) = &fc.candidate_bauds {
        anyhow::ensure!(!bauds.is_empty(), "fc.candidate_bauds is empty");
    }
    anyhow::ensure!(fc.sys_id != fc.target_sys, "fc.sys_id must differ from fc.target_sys");
    anyhow::ensure!(fc.ack_timeout_ms.unwrap_or(3000) >= 100, "fc.ack_timeout_ms too small");
    if let Some(hz) = fc.send_heartbeat_hz {
        anyhow::ensure!(hz > 0.0 && hz <= 50.0, "fc.send_heartbeat_hz should be 0..50");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FcConfig {
        FcConfig {
            url: Some("udpin:0.0.0.0:14550".into()),
            autodetect: false,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: None,
            sys_id: 200,
            comp_id: 191,
            target_sys: 1,
            target_comp: 1,
            ack_timeout_ms: None,
            send_heartbeat_hz: None,
        }
    }

    #[test]
    fn accepts_udp_url() {
        assert!(check_link(&cfg()).is_ok());
    }

    #[test]
    fn rejects_missing_or_unknown_url() {
        let mut c = cfg();
        c.url = None;
        assert!(check_link(&c).is_err());
        c.url = Some("http://drone".into());
        assert!(check_link(&c).is_err());
        // autodetect does not need one
        c.autodetect = true;
        assert!(check_link(&c).is_ok());
    }

    #[test]
    fn rejects_id_clash() {
        let mut c = cfg();
        c.sys_id = 1;
        assert!(check_link(&c).unwrap_err().to_string().contains("sys_id"));
    }
}
