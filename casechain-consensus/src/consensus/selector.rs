use rand::{seq::SliceRandom, Rng};

use casechain_common::Peer;

use super::evaluator::ceil_percent;

/// Draws a fresh committee of voters for every dispatch round.
#[derive(Debug, Clone, Copy)]
pub struct DelegateSelector {
    percent: u32,
}

impl DelegateSelector {
    pub fn new(percent: u32) -> Self {
        Self { percent }
    }

    /// Samples `ceil(percent% of voters)` distinct voter peers uniformly,
    /// without replacement. Non-voter peers are ignored.
    pub fn select_with<R: Rng + ?Sized>(&self, peers: &[Peer], rng: &mut R) -> Vec<Peer> {
        let voters: Vec<&Peer> = peers.iter().filter(|p| p.is_voter()).collect();
        let count = ceil_percent(voters.len(), self.percent);
        voters
            .choose_multiple(rng, count)
            .map(|p| (*p).clone())
            .collect()
    }

    pub fn select(&self, peers: &[Peer]) -> Vec<Peer> {
        self.select_with(peers, &mut rand::thread_rng())
    }
}
