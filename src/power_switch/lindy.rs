use super::{classify_transport_error, PowerState, PowerSwitch, PowerSwitchError};

const LINDY_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.12; rv:56.0) Gecko/20100101 Firefox/56.0";
const LINDY_BASIC_AUTH: &str = "Basic c25tcDoxMjM0";

/// Lindy IP power switch: `GET`-style outlet control via a 24-character LED mask,
/// one `1` at `outlet - 1`, everything else `0`.
pub struct LindySwitch {
    switch_ip: String,
    agent: ureq::Agent,
}

impl LindySwitch {
    pub fn new(switch_ip: String) -> Self {
        Self {
            switch_ip,
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(10))
                .build(),
        }
    }

    fn led_mask(outlet: u8) -> String {
        let mut mask = vec![b'0'; 24];
        let idx = (outlet - 1) as usize;
        mask[idx] = b'1';
        String::from_utf8(mask).expect("mask is ASCII digits by construction")
    }
}

impl PowerSwitch for LindySwitch {
    fn set(&self, outlet: u8, state: PowerState) -> Result<(), PowerSwitchError> {
        let mask = Self::led_mask(outlet);
        let endpoint = match state {
            PowerState::On => "ons.cgi",
            PowerState::Off => "offs.cgi",
        };
        let url = format!("http://{}/{}?led={}", self.switch_ip, endpoint, mask);

        self.agent
            .post(&url)
            .set("User-Agent", LINDY_USER_AGENT)
            .set("Referer", &format!("http://{}/outlet.htm", self.switch_ip))
            .set("Authorization", LINDY_BASIC_AUTH)
            .set("Content-Length", "0")
            .call()
            .map(|_| ())
            .map_err(classify_transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_mask_sets_single_bit_at_outlet_minus_one() {
        assert_eq!(
            LindySwitch::led_mask(1),
            "100000000000000000000000"
        );
        assert_eq!(
            LindySwitch::led_mask(24),
            "000000000000000000000001"
        );
        assert_eq!(LindySwitch::led_mask(1).len(), 24);
    }
}
