//! Intersection of dependent tuple streams.
//!
//! Each input stream carries [`Object`]s that an upstream job has already
//! resolved. The intersection emits merged objects on which every input agrees
//! (no shared key with different values) and which every input has corroborated.
//!
//! # Candidates and vouching
//!
//! Several key combinations can be in flight at once, so the intersection keeps
//! a list of *candidates*. An incoming object from stream `s`:
//!
//! - merges into **every** compatible candidate; `s` then vouches for every key
//!   of the merged value, including keys its own object did not mention (silence
//!   is not contradiction);
//! - seeds a new candidate, vouched for by `s` alone, when nothing is compatible.
//!
//! A candidate completes once each of its keys has been vouched for by all N
//! streams. Completed candidates are emitted oldest first and removed; the rest
//! of the list is left untouched.
//!
//! Completed values are handed to the consumer unbuffered: the reader that
//! completed a candidate waits until `next` takes it, and the other readers
//! wait behind it, so upstream producers feel a slow consumer.
//!
//! Inputs may also declare their *key domain* through [`intersect_with`]. A
//! stream implicitly vouches for keys outside its domain, and a candidate must
//! hold every key of the declared domains before it can complete.

use crate::error::{Error, Result};
use crate::handoff::{self, Delivery};
use crate::object::{Keyword, Object};
use crate::stream::{BoxStream, Stream};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tuning for [`intersect_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntersectOptions {
    /// Upper bound on live candidates; the oldest is evicted past it.
    /// `None` keeps every candidate.
    pub max_candidates: Option<usize>,
}

/// One input of [`intersect_with`].
pub struct IntersectInput<T> {
    stream: BoxStream<Object<T>>,
    domain: Option<BTreeSet<Keyword>>,
}

impl<T> IntersectInput<T> {
    pub fn new(stream: BoxStream<Object<T>>) -> Self {
        Self {
            stream,
            domain: None,
        }
    }

    /// Declare every key this stream can ever produce.
    #[must_use]
    pub fn with_domain<K: Into<Keyword>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.domain = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug)]
struct Candidate<T> {
    value: Object<T>,
    contributions: usize,
    vouchers: BTreeMap<Keyword, BTreeSet<usize>>,
}

/// The candidate list and the rules that drive it, independent of any task.
#[derive(Debug)]
pub(crate) struct CandidateSet<T> {
    domains: Vec<Option<BTreeSet<Keyword>>>,
    required: BTreeSet<Keyword>,
    candidates: Vec<Candidate<T>>,
    max_candidates: Option<usize>,
}

impl<T: Clone + PartialEq> CandidateSet<T> {
    pub(crate) fn new(domains: Vec<Option<BTreeSet<Keyword>>>, options: IntersectOptions) -> Self {
        let required = domains.iter().flatten().flatten().cloned().collect();
        Self {
            domains,
            required,
            candidates: Vec::new(),
            max_candidates: options.max_candidates,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Record `obj` from input `stream` and return every candidate it completed,
    /// oldest first.
    pub(crate) fn offer(&mut self, stream: usize, obj: Object<T>) -> Vec<Object<T>> {
        let mut matched = false;
        for candidate in self.candidates.iter_mut().filter(|c| c.value.is_compatible(&obj)) {
            matched = true;
            candidate.contributions += 1;
            candidate.value = candidate.value.concat(&obj);
            for key in candidate.value.keys() {
                candidate.vouchers.entry(key.clone()).or_default().insert(stream);
            }
        }

        if !matched && !obj.is_empty() {
            let vouchers = obj
                .keys()
                .map(|k| (k.clone(), BTreeSet::from([stream])))
                .collect();
            self.candidates.push(Candidate {
                value: obj,
                contributions: 1,
                vouchers,
            });
            self.evict_overflow();
        }

        let mut completed = Vec::new();
        let mut idx = 0;
        while idx < self.candidates.len() {
            if self.is_complete(&self.candidates[idx]) {
                let candidate = self.candidates.remove(idx);
                debug!(
                    contributions = candidate.contributions,
                    keys = ?candidate.value.keys().collect::<Vec<_>>(),
                    "candidate complete"
                );
                completed.push(candidate.value);
            } else {
                idx += 1;
            }
        }
        completed
    }

    fn evict_overflow(&mut self) {
        let Some(max) = self.max_candidates else {
            return;
        };
        while self.candidates.len() > max.max(1) {
            let evicted = self.candidates.remove(0);
            warn!(
                keys = ?evicted.value.keys().collect::<Vec<_>>(),
                max, "evicting oldest intersection candidate"
            );
        }
    }

    fn is_complete(&self, candidate: &Candidate<T>) -> bool {
        if candidate.value.is_empty() || !self.required.iter().all(|k| candidate.value.contains_key(k)) {
            return false;
        }
        candidate.value.keys().all(|key| {
            let vouched = candidate.vouchers.get(key);
            (0..self.domains.len()).all(|stream| {
                vouched.is_some_and(|v| v.contains(&stream)) || self.vouches_implicitly(stream, key)
            })
        })
    }

    fn vouches_implicitly(&self, stream: usize, key: &str) -> bool {
        self.domains[stream]
            .as_ref()
            .is_some_and(|domain| !domain.contains(key))
    }
}

struct Shared<T> {
    candidates: Mutex<CandidateSet<T>>,
    // held across detection and hand-off so completions leave in detection order
    output: AsyncMutex<handoff::Sender<Result<Object<T>>>>,
}

impl<T: Clone + PartialEq> Shared<T> {
    /// Offer `obj` and hand every completed candidate to the consumer, blocking
    /// until each one is taken.
    ///
    /// Returns `false` once the reader should stop: shutdown fired or the
    /// intersection was dropped.
    async fn offer(&self, stream: usize, obj: Object<T>, shutdown: &CancellationToken) -> bool {
        let Some(mut output) = self.lock_output(shutdown).await else {
            return false;
        };
        let completed = self
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offer(stream, obj);
        for value in completed {
            match output.send(Ok(value), shutdown).await {
                Ok(Delivery::Delivered) => {}
                Ok(Delivery::Disconnected) | Err(_) => return false,
            }
        }
        true
    }

    async fn fail(&self, err: Error, shutdown: &CancellationToken) {
        if let Some(mut output) = self.lock_output(shutdown).await {
            let _ = output.send(Err(err), shutdown).await;
        }
    }

    async fn lock_output(
        &self,
        shutdown: &CancellationToken,
    ) -> Option<MutexGuard<'_, handoff::Sender<Result<Object<T>>>>> {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            guard = self.output.lock() => Some(guard),
        }
    }
}

/// Stream returned by [`intersect`] and [`intersect_with`] for two or more inputs.
pub struct Intersection<T> {
    output: handoff::Receiver<Result<Object<T>>>,
    readers: Vec<JoinHandle<Result<()>>>,
    shutdown: CancellationToken,
}

/// Intersect `streams`.
///
/// A single stream is returned unchanged. Must be called from within a tokio
/// runtime; the readers stop when `cancel` fires or the result is closed.
pub fn intersect<T>(cancel: &CancellationToken, streams: Vec<BoxStream<Object<T>>>) -> BoxStream<Object<T>>
where
    T: Clone + PartialEq + Send + 'static,
{
    let inputs = streams.into_iter().map(IntersectInput::new).collect();
    intersect_with(cancel, inputs, IntersectOptions::default())
}

/// Intersect `inputs`, honouring their declared key domains and `options`.
pub fn intersect_with<T>(
    cancel: &CancellationToken,
    mut inputs: Vec<IntersectInput<T>>,
    options: IntersectOptions,
) -> BoxStream<Object<T>>
where
    T: Clone + PartialEq + Send + 'static,
{
    if inputs.len() == 1 {
        if let Some(only) = inputs.pop() {
            return only.stream;
        }
    }

    let shutdown = cancel.child_token();
    let (tx, output) = handoff::channel();
    let domains = inputs.iter().map(|input| input.domain.clone()).collect();
    let shared = Arc::new(Shared {
        candidates: Mutex::new(CandidateSet::new(domains, options)),
        output: AsyncMutex::new(tx),
    });

    let readers = inputs
        .into_iter()
        .enumerate()
        .map(|(idx, input)| tokio::spawn(read(idx, input.stream, Arc::clone(&shared), shutdown.clone())))
        .collect();

    Box::new(Intersection {
        output,
        readers,
        shutdown,
    })
}

async fn read<T>(
    idx: usize,
    mut stream: BoxStream<Object<T>>,
    shared: Arc<Shared<T>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    T: Clone + PartialEq + Send + 'static,
{
    loop {
        match stream.next(&shutdown).await {
            Ok(obj) => {
                debug!(stream = idx, keys = ?obj.keys().collect::<Vec<_>>(), "offering to intersection");
                if !shared.offer(idx, obj, &shutdown).await {
                    break;
                }
            }
            Err(Error::EndOfStream | Error::Interrupted) => break,
            Err(err) => {
                shared.fail(err, &shutdown).await;
                break;
            }
        }
    }
    // drop our share of the output before closing so end of stream is not delayed
    drop(shared);
    stream.close().await
}

#[async_trait]
impl<T: Clone + PartialEq + Send + 'static> Stream<Object<T>> for Intersection<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Object<T>> {
        // the hand-off ends once every reader has dropped its share of the sender
        self.output.recv(cancel).await?
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown.cancel();
        let mut errors = Vec::new();
        for (idx, reader) in self.readers.drain(..).enumerate() {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push((idx.to_string(), err)),
                Err(join) => errors.push((
                    idx.to_string(),
                    Error::upstream(anyhow::anyhow!("reader task failed: {join}")),
                )),
            }
        }
        Error::from_close_errors(errors)
    }
}

impl<T> Drop for Intersection<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, u32)]) -> Object<u32> {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn set(streams: usize) -> CandidateSet<u32> {
        CandidateSet::new(vec![None; streams], IntersectOptions::default())
    }

    #[test]
    fn disjoint_keys_wait_for_corroboration() {
        let mut set = set(2);
        assert!(set.offer(0, obj(&[("x", 1)])).is_empty());
        // y is only vouched for by stream 1 so far
        assert!(set.offer(1, obj(&[("y", 2)])).is_empty());
        // stream 0 contributes again and implicitly vouches for y
        let done = set.offer(0, obj(&[("x", 1)]));
        assert_eq!(done, vec![obj(&[("x", 1), ("y", 2)])]);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn same_stream_twice_is_not_corroboration() {
        let mut set = set(2);
        assert!(set.offer(0, obj(&[("x", 1)])).is_empty());
        assert!(set.offer(0, obj(&[("x", 1)])).is_empty());
        assert_eq!(set.offer(1, obj(&[("x", 1)])), vec![obj(&[("x", 1)])]);
    }

    #[test]
    fn conflicting_values_never_merge() {
        let mut set = set(2);
        assert!(set.offer(0, obj(&[("k", 1)])).is_empty());
        assert!(set.offer(1, obj(&[("k", 2)])).is_empty());
        assert_eq!(set.len(), 2);
        assert_eq!(set.offer(1, obj(&[("k", 1)])), vec![obj(&[("k", 1)])]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn only_the_completed_candidate_is_removed() {
        let mut set = set(2);
        set.offer(0, obj(&[("k", 1)]));
        set.offer(0, obj(&[("k", 2)]));
        set.offer(0, obj(&[("k", 3)]));
        assert_eq!(set.offer(1, obj(&[("k", 3)])), vec![obj(&[("k", 3)])]);
        // the older candidates are still in flight
        assert_eq!(set.len(), 2);
        assert_eq!(set.offer(1, obj(&[("k", 1)])), vec![obj(&[("k", 1)])]);
    }

    #[test]
    fn one_object_can_complete_several_candidates_in_order() {
        let mut set = set(2);
        set.offer(0, obj(&[("k", 1), ("a", 1)]));
        set.offer(0, obj(&[("k", 1), ("a", 2)]));
        let done = set.offer(1, obj(&[("k", 1)]));
        assert_eq!(done, vec![obj(&[("k", 1), ("a", 1)]), obj(&[("k", 1), ("a", 2)])]);
    }

    #[test]
    fn declared_domains_vouch_for_foreign_keys() {
        let domains = vec![
            Some(BTreeSet::from(["repo".to_string()])),
            Some(BTreeSet::from(["config".to_string()])),
        ];
        let mut set = CandidateSet::new(domains, IntersectOptions::default());
        // repo alone is vouched for by both, but config is still missing
        assert!(set.offer(0, obj(&[("repo", 1)])).is_empty());
        let done = set.offer(1, obj(&[("config", 7)]));
        assert_eq!(done, vec![obj(&[("repo", 1), ("config", 7)])]);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut set = CandidateSet::new(vec![None, None], IntersectOptions { max_candidates: Some(2) });
        set.offer(0, obj(&[("k", 1)]));
        set.offer(0, obj(&[("k", 2)]));
        set.offer(0, obj(&[("k", 3)]));
        assert_eq!(set.len(), 2);
        assert!(set.offer(1, obj(&[("k", 1)])).is_empty());
    }

    #[test]
    fn empty_objects_never_complete_on_their_own() {
        let mut set = set(2);
        assert!(set.offer(0, Object::new()).is_empty());
        assert!(set.offer(1, Object::new()).is_empty());
        assert_eq!(set.len(), 0);
    }
}
