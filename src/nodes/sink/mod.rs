mod rtrb_sink;

pub use rtrb_sink::*;
