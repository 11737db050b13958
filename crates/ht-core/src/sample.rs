//! Sample type and block definitions

/// Type alias for audio samples.
///
/// The hex pickup delivers float32 streams and captures are written as
/// float32 WAVs, so the whole pipeline stays in f32.
pub type Sample = f32;

/// Number of strings on the instrument (and channels from the hex pickup).
pub const STRING_COUNT: usize = 6;

/// A block of six per-string channel slices. A `None` channel is silence.
pub type ChannelBlock<'a> = [Option<&'a [Sample]>; STRING_COUNT];
