use crate::error::{FrameError, Result};

/// Split `data` into the fewest fragments that fit `budget` once wrapped.
///
/// `envelope_size(index, candidate)` must return the exact wire size of the
/// command that would carry `candidate` as fragment `index`, and must grow
/// monotonically with the candidate length. Each fragment is the longest
/// prefix of the remaining data whose wrapped size is `<= budget`; prefixes
/// always end on a character boundary.
///
/// Returns [`FrameError::OverheadTooLarge`] if not even one character fits.
/// An empty `data` yields no fragments.
pub fn packetize<F>(data: &str, budget: usize, mut envelope_size: F) -> Result<Vec<String>>
where
    F: FnMut(usize, &str) -> usize,
{
    let mut fragments = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let index = fragments.len();

        // A character costs at least one byte, so no fragment can hold more
        // than `budget` characters.
        let ends: Vec<usize> = rest
            .char_indices()
            .take(budget)
            .map(|(offset, ch)| offset + ch.len_utf8())
            .collect();

        let mut low = 1usize;
        let mut high = ends.len();
        let mut best = 0usize;
        while low <= high {
            let mid = low + (high - low) / 2;
            if envelope_size(index, &rest[..ends[mid - 1]]) <= budget {
                best = mid;
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }

        if best == 0 {
            return Err(FrameError::OverheadTooLarge {
                overhead: envelope_size(index, ""),
                budget,
            });
        }

        let split = ends[best - 1];
        fragments.push(rest[..split].to_string());
        rest = &rest[split..];
    }

    Ok(fragments)
}
