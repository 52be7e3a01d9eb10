//! Unique jump-target names for one compilation run.

use log::trace;

const DIGITS: u32 = 3;
const RADIX: u32 = 26;

/// Number of distinct labels one allocator can hand out.
pub const CAPACITY: u32 = RADIX * RADIX * RADIX;

/// Monotonic counter encoded as fixed-width base-26 (`AAA`, `AAB`, ...).
#[derive(Debug, Default)]
pub struct LabelAllocator {
  next: u32,
}

impl LabelAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return a label never handed out before by this allocator, or `None`
  /// once the three-digit space is used up.
  pub fn allocate(&mut self) -> Option<String> {
    if self.next >= CAPACITY {
      return None;
    }

    let label = encode(self.next);
    self.next += 1;
    trace!("allocated label {label}");
    Some(label)
  }
}

fn encode(mut value: u32) -> String {
  let mut digits = [b'A'; DIGITS as usize];
  for digit in digits.iter_mut().rev() {
    // value % RADIX < 26, so the cast cannot truncate.
    *digit = b'A' + (value % RADIX) as u8;
    value /= RADIX;
  }
  digits.iter().map(|&b| b as char).collect()
}
