//! Sample mixing for mono and stereo output

/// Output channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Both parties averaged into one channel
    Mono,
    /// Local left and remote right, crossfaded by `pan` (0..=100)
    Stereo { pan: u8 },
}

impl ChannelLayout {
    pub fn is_stereo(&self) -> bool {
        matches!(self, ChannelLayout::Stereo { .. })
    }

    pub fn channels(&self) -> u16 {
        if self.is_stereo() {
            2
        } else {
            1
        }
    }
}

/// Average `remote` into `local` in place. Integer division truncates toward zero.
pub fn mix_to_mono(local: &mut [i16], remote: &[i16]) {
    for (l, &r) in local.iter_mut().zip(remote) {
        *l = ((i32::from(*l) + i32::from(r)) / 2) as i16;
    }
}

/// Crossfade the two channels in place.
///
/// `pan == 0` leaves both untouched and `pan == 100` swaps them; in between
/// each side keeps `100 - pan` percent of itself and takes `pan` percent of
/// the other, rounded.
pub fn mix_to_stereo(local: &mut [i16], remote: &mut [i16], pan: u8) {
    let n = local.len().min(remote.len());
    let (local, remote) = (&mut local[..n], &mut remote[..n]);

    match pan {
        0 => {}
        p if p >= 100 => local.swap_with_slice(remote),
        p => {
            let keep = 100 - i32::from(p);
            let take = i32::from(p);
            for (l, r) in local.iter_mut().zip(remote.iter_mut()) {
                let (a, b) = (i32::from(*l), i32::from(*r));
                *l = ((a * keep + b * take + 50) / 100) as i16;
                *r = ((a * take + b * keep + 50) / 100) as i16;
            }
        }
    }
}
