pub const HEIGHT: usize = 150;
pub const WIDTH: usize = 150;
pub const CHANNELS: usize = 3;
