//! Circular interval arithmetic.

use crate::token::Token;

/// Is `value` inside the circular range starting after `from` and ending at
/// `to`, walking clockwise?
///
/// The left bound is always excluded. The right bound is included when
/// `right_inclusive` is set. When `from == to` the range covers the whole
/// ring: inclusive matches everything, exclusive everything except `from`.
#[inline]
pub fn inside(from: Token, to: Token, value: Token, right_inclusive: bool) -> bool {
    let span = from.distance_to(to);
    let offset = from.distance_to(value);

    if offset == 0 {
        return span == 0 && right_inclusive;
    }
    if span == 0 {
        return true;
    }
    if right_inclusive {
        offset <= span
    } else {
        offset < span
    }
}

/// `(from, to]`
#[inline]
pub fn inside_half_open(from: Token, to: Token, value: Token) -> bool {
    inside(from, to, value, true)
}

/// `(from, to)`
#[inline]
pub fn inside_open(from: Token, to: Token, value: Token) -> bool {
    inside(from, to, value, false)
}
