mod event_view;
mod history_view;
mod painter;
mod peripheral_view;
mod table;

pub(crate) use self::event_view::EventLineView;
pub(crate) use self::history_view::HistoryView;
pub(crate) use self::painter::Painter;
pub(crate) use self::peripheral_view::{ConnectedView, ScanResultsView};
pub(crate) use self::table::Table;
