//! Synthetic snapshot builders shared by the unit tests.

use crate::{Address, Value};

/// A ring of `count` pointers starting at `start`, spaced `stride` bytes:
/// each address holds the address of its successor, the last wraps to the
/// first. Walked at offset 0 this is one closed chain.
pub(crate) fn ring(start: Address, count: usize, stride: u32) -> (Vec<Address>, Vec<Value>) {
    let addresses: Vec<Address> = (0..count as u32).map(|i| start + i * stride).collect();
    let values: Vec<Value> = (0..count)
        .map(|i| addresses[(i + 1) % count])
        .collect();
    (addresses, values)
}

/// An open chain: like [`ring`] but the last node points outside the set.
pub(crate) fn chain(start: Address, count: usize, stride: u32) -> (Vec<Address>, Vec<Value>) {
    let addresses: Vec<Address> = (0..count as u32).map(|i| start + i * stride).collect();
    let values: Vec<Value> = addresses.iter().map(|&a| a + stride).collect();
    (addresses, values)
}

/// An open chain whose traversal order is the listing order, independent
/// of how the addresses sort: each listed address holds the next listed
/// address, the last points outside the set. Heap-allocated lists look
/// like this — the head need not be the lowest address.
pub(crate) fn scrambled_chain(order: &[Address]) -> (Vec<Address>, Vec<Value>) {
    let tail = order.last().copied().unwrap() + 0x1000;
    let values: Vec<Value> = (0..order.len())
        .map(|i| order.get(i + 1).copied().unwrap_or(tail))
        .collect();
    (order.to_vec(), values)
}

/// Remove one row by address from a batch pair.
pub(crate) fn without(
    addresses: &[Address],
    values: &[Value],
    drop: Address,
) -> (Vec<Address>, Vec<Value>) {
    addresses
        .iter()
        .zip(values)
        .filter(|(&a, _)| a != drop)
        .map(|(&a, &v)| (a, v))
        .unzip()
}
