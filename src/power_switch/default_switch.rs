use super::{classify_transport_error, PowerState, PowerSwitch, PowerSwitchError};

/// Generic IP power switch speaking the `iocontrol.tgi` form-post dialect: outlet
/// `n` is addressed as field `P6{n-1}` with value `On`/`Off`.
pub struct DefaultSwitch {
    switch_ip: String,
    agent: ureq::Agent,
}

impl DefaultSwitch {
    pub fn new(switch_ip: String) -> Self {
        Self {
            switch_ip,
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(10))
                .build(),
        }
    }
}

impl PowerSwitch for DefaultSwitch {
    fn set(&self, outlet: u8, state: PowerState) -> Result<(), PowerSwitchError> {
        let field = format!("P6{}", outlet - 1);
        let value = match state {
            PowerState::On => "On",
            PowerState::Off => "Off",
        };
        let url = format!("http://{}/tgi/iocontrol.tgi", self.switch_ip);

        self.agent
            .post(&url)
            .send_form(&[(field.as_str(), value), ("Apply", "Apply")])
            .map(|_| ())
            .map_err(classify_transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlet_one_maps_to_field_p60() {
        // field naming follows P6{outlet-1}, outlet numbering is 1-based
        let outlet: u8 = 1;
        assert_eq!(format!("P6{}", outlet - 1), "P60");
    }
}
