// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// This file defines a type to represent a TCP sequence number.
//
// RFC 793, Section 3.3 defines the sequence number space as 0 to 2^32 - 1, wrapping around, so all arithmetic on
// sequence numbers is performed modulo 2^32. Excluding equality, comparisons between sequence numbers are therefore
// non-transitive, which is why they get their own type instead of a bare u32.

use ::std::{
    cmp::Ordering,
    fmt,
};

/// A 32-bit TCP sequence number with modular arithmetic.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SeqNumber(u32);

impl From<u32> for SeqNumber {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ::std::ops::Add for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: SeqNumber) -> SeqNumber {
        Self(self.0.wrapping_add(other.0))
    }
}

impl ::std::ops::Sub for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, other: SeqNumber) -> SeqNumber {
        Self(self.0.wrapping_sub(other.0))
    }
}

// We implement the comparison operators through PartialOrd, but sequence numbers have no total order (a < b < c < a is
// a reachable configuration), so partial_cmp itself must never be used for sorting. It panics to catch such misuse.
impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, _other: &Self) -> Option<Ordering> {
        panic!("sequence numbers cannot be totally ordered");
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) <= 0
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) >= 0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
