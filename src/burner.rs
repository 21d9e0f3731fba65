//! Burner address inventory.
//!
//! Burner contracts are single-use `selfdestruct` helpers deployed via
//! CREATE2 in batches ("groups") sharing one salt. This module only
//! tracks which addresses have been handed out and which remain — the
//! on-chain CREATE2 deployment flow that produces new groups is out of
//! scope here.
//!

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One CREATE2-deployed batch of burner addresses, all sharing `salt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnerGroup {
    pub salt: U256,
    pub addresses: VecDeque<Address>,
}

/// FIFO-ordered burner inventory: addresses are always consumed from the
/// oldest group first, and a group is dropped once emptied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurnerPool {
    groups: VecDeque<BurnerGroup>,
}

impl BurnerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_group(&mut self, salt: U256, addresses: Vec<Address>) {
        self.groups.push_back(BurnerGroup {
            salt,
            addresses: addresses.into(),
        });
    }

    pub fn available(&self) -> usize {
        self.groups.iter().map(|g| g.addresses.len()).sum()
    }

    /// Pop up to `count` addresses, FIFO across groups. Returns fewer than
    /// `count` if the pool is exhausted.
    pub fn consume(&mut self, count: u32) -> Vec<Address> {
        let mut taken = Vec::with_capacity(count as usize);
        while taken.len() < count as usize {
            let Some(group) = self.groups.front_mut() else {
                break;
            };
            match group.addresses.pop_front() {
                Some(addr) => taken.push(addr),
                None => {
                    self.groups.pop_front();
                }
            }
            if group.addresses.is_empty() {
                self.groups.pop_front();
            }
        }
        taken
    }

    /// Return addresses that were taken via [`consume`] but never
    /// broadcast (e.g. the candidate was rejected before submission).
    /// Reinserted at the front of the oldest group so they're the next
    /// ones handed out again.
    pub fn release(&mut self, addresses: Vec<Address>) {
        if addresses.is_empty() {
            return;
        }
        if let Some(group) = self.groups.front_mut() {
            for addr in addresses.into_iter().rev() {
                group.addresses.push_front(addr);
            }
        } else {
            self.groups.push_front(BurnerGroup {
                salt: U256::ZERO,
                addresses: addresses.into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        Address::from(bytes)
    }

    #[test]
    fn consume_drains_fifo_across_groups() {
        let mut pool = BurnerPool::new();
        pool.push_group(U256::from(1), vec![addr(1), addr(2)]);
        pool.push_group(U256::from(2), vec![addr(3), addr(4)]);

        let taken = pool.consume(3);
        assert_eq!(taken, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn consume_stops_when_exhausted() {
        let mut pool = BurnerPool::new();
        pool.push_group(U256::from(1), vec![addr(1)]);
        let taken = pool.consume(5);
        assert_eq!(taken, vec![addr(1)]);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn release_returns_addresses_for_reuse() {
        let mut pool = BurnerPool::new();
        pool.push_group(U256::from(1), vec![addr(1), addr(2)]);
        let taken = pool.consume(2);
        pool.release(taken);
        assert_eq!(pool.available(), 2);
    }
}
