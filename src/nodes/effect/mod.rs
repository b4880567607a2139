mod add;
mod mul;

pub use add::*;
pub use mul::*;
