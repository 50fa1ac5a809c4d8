use std::ops::Range;

/// Packs newline-terminated lines into datagrams that do not exceed a maximum length.
///
/// Datagrams are contiguous slices of the original payload, so packing never copies. Each datagram holds one or more
/// complete lines, in their original order. A line that is longer than the maximum datagram length by itself can never
/// be sent and is dropped.
pub(crate) struct DatagramPacker<'a> {
    payload: &'a [u8],
    ranges: Vec<Range<usize>>,
    lines_dropped: u64,
}

impl<'a> DatagramPacker<'a> {
    /// Packs `payload` into datagrams of at most `max_datagram_len` bytes.
    pub fn new(payload: &'a [u8], max_datagram_len: usize) -> Self {
        let mut ranges = Vec::new();
        let mut lines_dropped = 0;

        // The datagram currently being filled, as a range over `payload`.
        let mut current: Option<Range<usize>> = None;

        let mut start = 0;
        while start < payload.len() {
            let end = payload[start..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(payload.len(), |pos| start + pos + 1);
            let line_len = end - start;

            if line_len > max_datagram_len {
                // Anything already packed has to be flushed, since the datagram can no longer be contiguous.
                ranges.extend(current.take());
                lines_dropped += 1;
            } else {
                current = match current.take() {
                    Some(range) if end - range.start <= max_datagram_len => Some(range.start..end),
                    Some(range) => {
                        ranges.push(range);
                        Some(start..end)
                    }
                    None => Some(start..end),
                };
            }

            start = end;
        }

        ranges.extend(current);
        Self { payload, ranges, lines_dropped }
    }

    /// Returns the number of lines that were too large to fit in any datagram.
    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// Returns the number of datagrams.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns an iterator over the datagrams, in payload order.
    pub fn datagrams(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        let payload = self.payload;
        self.ranges.iter().map(move |range| &payload[range.clone()])
    }
}
