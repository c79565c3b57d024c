use std::iter::FusedIterator;

/// An iterator over the lines of a byte buffer.
///
/// Lines are split at `\n` and a trailing `\r` is stripped, so files written on Windows parse the
/// same as on Unix. Unlike `str::lines`, this does not require the buffer to be valid UTF-8 which
/// allows skipping individual corrupt lines.
#[derive(Clone, Debug)]
pub(crate) struct Lines<'data> {
    data: &'data [u8],
    finished: bool,
}

impl<'data> Lines<'data> {
    #[inline]
    pub fn new(data: &'data [u8]) -> Self {
        Lines {
            data,
            finished: data.is_empty(),
        }
    }
}

impl<'data> Iterator for Lines<'data> {
    type Item = &'data [u8];

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.data.iter().position(|b| *b == b'\n') {
            None => {
                self.finished = true;
                Some(strip_cr(self.data))
            }
            Some(index) => {
                let line = strip_cr(&self.data[..index]);
                self.data = &self.data[index + 1..];
                if self.data.is_empty() {
                    self.finished = true;
                }
                Some(line)
            }
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (1, Some(self.data.len() + 1))
        }
    }
}

impl FusedIterator for Lines<'_> {}

#[inline]
fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_lines() {
        let lines: Vec<_> = Lines::new(b"MODULE a\r\nFUNC b\n\nPUBLIC c").collect();
        assert_eq!(
            lines,
            vec![&b"MODULE a"[..], &b"FUNC b"[..], &b""[..], &b"PUBLIC c"[..]]
        );
    }

    #[test]
    fn test_lines_trailing_newline() {
        let lines: Vec<_> = Lines::new(b"a\nb\n").collect();
        assert_eq!(lines, vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn test_lines_empty() {
        assert_eq!(Lines::new(b"").count(), 0);
    }
}
