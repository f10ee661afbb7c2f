use std::io::IoSlice;

/// Scratch buffer capacity for coalescing vectored writes.
///
/// Each sink call maps to at least one TLS record, so many tiny writes
/// are expensive. Fragments smaller than this get combined; anything
/// that can't fit is passed through without a copy.
pub(crate) const WRITE_BUFFER_SIZE: usize = 4096;

/// Deliver `bufs` to `sink`, coalescing small fragments into
/// [WRITE_BUFFER_SIZE]'d chunks.
///
/// A sub-range is copied into the scratch buffer when there are already
/// buffered bytes, or when this fragment is not the last one and the
/// remaining scratch capacity exceeds the fragment's remaining bytes.
/// The scratch buffer is flushed whenever it becomes exactly full, and
/// once more after the fragment loop if anything is left. Everything
/// else bypasses the buffer and goes to the sink directly.
///
/// Returns the cumulative byte count handed to the sink. A short sink
/// result terminates the whole operation with the bytes delivered so
/// far: a short write signals deadline exhaustion or backpressure, and
/// this layer does not retry it. A sink error propagates as `Err`.
pub(crate) fn write_coalesced<E, F>(bufs: &[IoSlice<'_>], mut sink: F) -> Result<usize, E>
where
    F: FnMut(&[u8]) -> Result<usize, E>,
{
    let mut scratch = [0u8; WRITE_BUFFER_SIZE];
    let mut fill = 0usize;
    let mut written = 0usize;

    for (i, buf) in bufs.iter().enumerate() {
        let last = i + 1 == bufs.len();
        let mut pos = 0usize;

        while pos < buf.len() {
            let rest = buf.len() - pos;
            let room = WRITE_BUFFER_SIZE - fill;

            if fill > 0 || (!last && room > rest) {
                let n = rest.min(room);
                scratch[fill..fill + n].copy_from_slice(&buf[pos..pos + n]);
                fill += n;
                pos += n;

                if fill == WRITE_BUFFER_SIZE {
                    let sent = sink(&scratch[..fill])?;
                    written += sent;
                    if sent < fill {
                        return Ok(written);
                    }
                    fill = 0;
                }
            } else {
                let chunk = &buf[pos..];
                let sent = sink(chunk)?;
                written += sent;
                if sent < chunk.len() {
                    return Ok(written);
                }
                pos += sent;
            }
        }
    }

    if fill > 0 {
        let sent = sink(&scratch[..fill])?;
        written += sent;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slices<'a>(frags: &'a [Vec<u8>]) -> Vec<IoSlice<'a>> {
        frags.iter().map(|f| IoSlice::new(f)).collect()
    }

    /// Sink that accepts everything and records each call.
    fn recording_sink(calls: &mut Vec<Vec<u8>>) -> impl FnMut(&[u8]) -> Result<usize, ()> + '_ {
        move |chunk| {
            calls.push(chunk.to_vec());
            Ok(chunk.len())
        }
    }

    #[test]
    fn small_fragments_coalesce_into_one_write() {
        let frags = vec![b"header ".to_vec(), b"body ".to_vec(), b"trailer".to_vec()];
        let mut calls = Vec::new();
        let n = write_coalesced(&slices(&frags), recording_sink(&mut calls)).unwrap();

        assert_eq!(n, 19);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], b"header body trailer");
    }

    #[test]
    fn oversized_fragment_bypasses_buffering() {
        let big = vec![0xabu8; WRITE_BUFFER_SIZE + 1];
        let frags = vec![big.clone()];
        let mut calls = Vec::new();
        let n = write_coalesced(&slices(&frags), recording_sink(&mut calls)).unwrap();

        assert_eq!(n, big.len());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], big);
    }

    #[test]
    fn oversized_fragment_bypasses_in_any_position() {
        // The large middle fragment forces the buffered prefix out, then
        // goes through directly.
        let big = vec![1u8; WRITE_BUFFER_SIZE * 2];
        let frags = vec![vec![2u8; 8], big.clone(), vec![3u8; 8]];
        let mut calls = Vec::new();
        let n = write_coalesced(&slices(&frags), recording_sink(&mut calls)).unwrap();

        assert_eq!(n, 8 + big.len() + 8);
        // 8 bytes buffered, topped up to 4096 from the big fragment and
        // flushed; the rest of the big fragment passes through; the tail
        // is flushed at the end.
        let total: usize = calls.iter().map(|c| c.len()).sum();
        assert_eq!(total, n);
        let flat: Vec<u8> = calls.concat();
        let expected: Vec<u8> = frags.concat();
        assert_eq!(flat, expected);
    }

    #[test]
    fn fills_then_flushes_remainder() {
        // {10, 4070, 50}: the first two fragments buffer up to 4080, the
        // last tops the buffer up to exactly 4096 which flushes, and the
        // remaining 34 bytes go out directly. Exactly two sink calls.
        let frags = vec![vec![1u8; 10], vec![2u8; 4070], vec![3u8; 50]];
        let mut calls = Vec::new();
        let n = write_coalesced(&slices(&frags), recording_sink(&mut calls)).unwrap();

        assert_eq!(n, 4130);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), WRITE_BUFFER_SIZE);
        assert_eq!(calls[1].len(), 34);
    }

    #[test]
    fn ordering_is_preserved() {
        let frags: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 700]).collect();
        let mut calls = Vec::new();
        let n = write_coalesced(&slices(&frags), recording_sink(&mut calls)).unwrap();

        assert_eq!(n, 7000);
        assert_eq!(calls.concat(), frags.concat());
    }

    #[test]
    fn short_write_stops_with_partial_count() {
        // Stop-on-short is deliberate: a short sink result is deadline
        // exhaustion or backpressure, and is not retried here.
        let frags = vec![vec![1u8; 4096], vec![2u8; 4096], vec![3u8; 4096]];
        let mut count = 0;
        let n = write_coalesced::<(), _>(&slices(&frags), |chunk| {
            count += 1;
            if count == 2 {
                Ok(chunk.len() / 2)
            } else {
                Ok(chunk.len())
            }
        })
        .unwrap();

        assert_eq!(n, 4096 + 2048);
        assert_eq!(count, 2);
    }

    #[test]
    fn sink_error_propagates() {
        let frags = vec![vec![1u8; 4096], vec![2u8; 16]];
        let mut count = 0;
        let res = write_coalesced(&slices(&frags), |chunk| {
            count += 1;
            if count == 1 { Ok(chunk.len()) } else { Err("boom") }
        });

        assert_eq!(res, Err("boom"));
    }

    #[test]
    fn empty_fragments_are_skipped() {
        let frags = vec![Vec::new(), b"abc".to_vec(), Vec::new()];
        let mut calls = Vec::new();
        let n = write_coalesced(&slices(&frags), recording_sink(&mut calls)).unwrap();

        assert_eq!(n, 3);
        assert_eq!(calls, vec![b"abc".to_vec()]);
    }
}
