use std::fmt::{self, Display, Formatter};

use crate::api::DiscoveredPeripheral;
use crate::session::{ConnectedPeripheral, ConnectionState};
use crate::utils::{format_rfc3339, format_signal};

use super::painter::Painter;
use super::table::Table;

/// Renders scan results, strongest signal first as given.
pub(crate) struct ScanResultsView<'a> {
    peripherals: &'a [DiscoveredPeripheral],
    painter: &'a Painter,
}

impl<'a> ScanResultsView<'a> {
    pub(crate) fn new(peripherals: &'a [DiscoveredPeripheral], painter: &'a Painter) -> Self {
        Self {
            peripherals,
            painter,
        }
    }
}

impl Display for ScanResultsView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.peripherals.is_empty() {
            return write!(f, "{}", self.painter.warning("No peripherals found."));
        }

        let rows = self
            .peripherals
            .iter()
            .map(|peripheral| {
                vec![
                    self.painter.value(peripheral.address()),
                    peripheral.display_name().to_string(),
                    format_signal(peripheral.signal_strength()),
                    peripheral.advertised_services().join(", "),
                ]
            })
            .collect();
        let table = Table::grid(["address", "name", "signal", "services"], rows);

        write!(
            f,
            "{}",
            self.painter
                .heading(format!("Discovered peripherals ({}):", self.peripherals.len()))
        )?;
        write!(f, "\n{table}")
    }
}

/// Renders the connected peripheral and the resulting session state.
pub(crate) struct ConnectedView<'a> {
    peripheral: &'a ConnectedPeripheral,
    state: ConnectionState,
    painter: &'a Painter,
}

impl<'a> ConnectedView<'a> {
    pub(crate) fn new(
        peripheral: &'a ConnectedPeripheral,
        state: ConnectionState,
        painter: &'a Painter,
    ) -> Self {
        Self {
            peripheral,
            state,
            painter,
        }
    }
}

impl Display for ConnectedView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let services = if self.peripheral.services().is_empty() {
            self.painter.muted("<none>")
        } else {
            self.peripheral.services().join("\n")
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("address", self.painter.value(self.peripheral.address())),
                ("name", self.peripheral.display_name().to_string()),
                ("state", self.painter.state(self.state)),
                (
                    "connected_at",
                    format_rfc3339(self.peripheral.connected_at()),
                ),
                ("services", services),
            ],
        );

        write!(f, "{}", self.painter.heading("Connected peripheral:"))?;
        write!(f, "\n{table}")
    }
}
