use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::floating_type_mod::FT;

#[derive(Clone)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        if self.values.is_empty() {
            return 0.;
        }
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }
    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::MAX, FT::min)
    }
    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::MIN, FT::max)
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    pub fn avg(&self) -> Duration {
        if self.values.is_empty() {
            return Duration::ZERO;
        }
        self.sum() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }
}

/// Sampled values per label (particle counts, divisions per cycle, ...).
pub struct ValueCounters {
    counters: BTreeMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: BTreeMap::new(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }
}

/// Wall-clock time per pass label.
pub struct PerformanceCounters {
    counters: BTreeMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: BTreeMap::new(),
            enabled,
        }
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    pub fn end(&mut self, id: &str) {
        if !self.enabled {
            return;
        }
        if let Some(counter) = self.counters.get_mut(id) {
            counter.end();
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }
}

/// Timing and value table, sorted by label.
pub fn write_statistics(pcounters: &PerformanceCounters, vcounters: &ValueCounters) -> String {
    let mut s = String::new();

    if let Some(step) = pcounters.get("simulation-step") {
        s.push_str(&format!(
            "simulation-time: {}ms ({} steps)\n\n",
            step.sum().as_secs_f64() * 1000.,
            step.len()
        ));
    }

    for (label, pcounter) in &pcounters.counters {
        s.push_str(&format!(
            "{}: avg:{:.4}ms total:{:.2}ms\n",
            label,
            pcounter.avg().as_secs_f64() * 1000.,
            pcounter.sum().as_secs_f64() * 1000.
        ));
    }
    s.push('\n');

    for (label, vcounter) in &vcounters.counters {
        s.push_str(&format!(
            "{}: min:{} max:{} avg:{}\n",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        ));
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_counters_record_nothing() {
        let mut pcounters = PerformanceCounters::new(false);
        pcounters.begin("grid-sort");
        pcounters.end("grid-sort");
        assert!(pcounters.get("grid-sort").is_none());

        let mut vcounters = ValueCounters::new(false);
        vcounters.add_value("particle-count", 1.);
        assert!(vcounters.get("particle-count").is_none());
    }

    #[test]
    fn statistics_list_every_label() {
        let mut pcounters = PerformanceCounters::new(true);
        for _ in 0..3 {
            pcounters.begin("simulation-step");
            pcounters.begin("grid-sort");
            pcounters.end("grid-sort");
            pcounters.end("simulation-step");
        }
        let mut vcounters = ValueCounters::new(true);
        vcounters.add_value("divided", 2.);
        vcounters.add_value("divided", 4.);

        assert_eq!(pcounters.get("grid-sort").unwrap().len(), 3);
        assert_eq!(vcounters.get("divided").unwrap().avg(), 3.);

        let table = write_statistics(&pcounters, &vcounters);
        assert!(table.contains("(3 steps)"));
        assert!(table.contains("grid-sort: avg:"));
        assert!(table.contains("divided: min:2 max:4 avg:3"));
    }
}
