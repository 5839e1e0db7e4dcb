//! Audio effects and their compilation into a decoder filter chain.
//!
//! Filters never touch samples themselves: every active effect is rendered into
//! its textual filter expression, and the whole set is joined into a single
//! `-af` argument for the decoder process.

use itertools::Itertools;
use std::fmt::{Display, Formatter};

use crate::error::PlaybackError;

const REVERB_EXPRESSION: &str = "aecho=1.0:0.7:20:0.5";
const TEMPO_BASE_RATE: u32 = 44100;
const MAX_TEMPO: f64 = 10.0;

const DEFAULT_DELAY_INTERVALS: [u32; 1] = [1000];
const DEFAULT_DELAY_DECAYS: [f64; 1] = [0.5];

/// Identifies a filter type. At most one filter of each kind is active at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FilterKind {
    Reverse = 1,
    Delay = 2,
    Tempo = 3,
    Volume = 4,
    Reverb = 5,
}

impl FilterKind {
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Adjustable filters take user supplied values, toggling one of them
    /// again replaces its parameters instead of switching it off.
    pub fn is_adjustable(self) -> bool {
        !spec_for(self).params.is_empty()
    }
}

impl Display for FilterKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(spec_for(*self).label)
    }
}

#[derive(Clone, Debug)]
pub enum AudioFilter {
    Reverse,
    Delay {
        in_gain: f64,
        out_gain: f64,
        /// Echo delays in milliseconds
        time_intervals: Vec<u32>,
        decays: Vec<f64>,
    },
    Tempo {
        speed: f64,
    },
    Volume {
        level: f64,
    },
    Reverb,
}

/// Filters are the same active effect when they are of the same kind,
/// regardless of their parameters.
impl PartialEq for AudioFilter {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }
}

impl AudioFilter {
    /// Echo with the default single 1 s delay at half decay.
    pub fn delay() -> Self {
        AudioFilter::Delay {
            in_gain: 1.0,
            out_gain: 1.0,
            time_intervals: DEFAULT_DELAY_INTERVALS.to_vec(),
            decays: DEFAULT_DELAY_DECAYS.to_vec(),
        }
    }

    pub fn tempo(speed: f64) -> Self {
        AudioFilter::Tempo { speed }
    }

    pub fn volume(level: f64) -> Self {
        AudioFilter::Volume { level }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            AudioFilter::Reverse => FilterKind::Reverse,
            AudioFilter::Delay { .. } => FilterKind::Delay,
            AudioFilter::Tempo { .. } => FilterKind::Tempo,
            AudioFilter::Volume { .. } => FilterKind::Volume,
            AudioFilter::Reverb => FilterKind::Reverb,
        }
    }

    /// Playback rate factor this filter applies, clamped to `[0, 10]`.
    /// `None` for filters that leave the rate untouched.
    pub fn speed(&self) -> Option<f64> {
        match self {
            // f64::max maps NaN to the lower bound
            AudioFilter::Tempo { speed } => Some(speed.max(0.0).min(MAX_TEMPO)),
            _ => None,
        }
    }

    /// Parameters compare equal as well as the kind.
    pub fn same_parameters(&self, other: &AudioFilter) -> bool {
        match (self, other) {
            (AudioFilter::Reverse, AudioFilter::Reverse) => true,
            (AudioFilter::Reverb, AudioFilter::Reverb) => true,
            (
                AudioFilter::Delay {
                    in_gain,
                    out_gain,
                    time_intervals,
                    decays,
                },
                AudioFilter::Delay {
                    in_gain: other_in_gain,
                    out_gain: other_out_gain,
                    time_intervals: other_time_intervals,
                    decays: other_decays,
                },
            ) => {
                in_gain == other_in_gain
                    && out_gain == other_out_gain
                    && time_intervals == other_time_intervals
                    && decays == other_decays
            }
            (AudioFilter::Tempo { speed }, AudioFilter::Tempo { speed: other }) => speed == other,
            (AudioFilter::Volume { level }, AudioFilter::Volume { level: other }) => level == other,
            _ => false,
        }
    }

    /// Textual form understood by the decoder's audio filter option.
    pub fn expression(&self) -> String {
        match self {
            AudioFilter::Reverse => "areverse".to_string(),
            AudioFilter::Delay {
                in_gain,
                out_gain,
                time_intervals,
                decays,
            } => format!(
                "aecho=in_gain={in_gain}:out_gain={out_gain}:delays={}:decays={}",
                time_intervals.iter().join("|"),
                decays.iter().join("|")
            ),
            AudioFilter::Tempo { speed } => format!("asetrate={TEMPO_BASE_RATE}*{speed}"),
            AudioFilter::Volume { level } => format!("volume={level}"),
            AudioFilter::Reverb => REVERB_EXPRESSION.to_string(),
        }
    }
}

impl Display for AudioFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression())
    }
}

/// Compiles filters, in processing order, into the aggregate speed multiplier
/// and the comma-joined chain expression (`None` when there are no filters).
pub fn compile(filters: &[AudioFilter]) -> (f64, Option<String>) {
    let speed = filters.iter().filter_map(AudioFilter::speed).product();

    let chain = if filters.is_empty() {
        None
    } else {
        Some(filters.iter().map(AudioFilter::expression).join(","))
    };

    (speed, chain)
}

/// An ordered filter list together with its compiled form.
#[derive(Clone, Debug)]
pub struct FilterGraph {
    filters: Vec<AudioFilter>,
    speed: f64,
    chain: Option<String>,
}

impl Default for FilterGraph {
    fn default() -> Self {
        FilterGraph::new(Vec::new())
    }
}

impl FilterGraph {
    pub fn new(filters: impl IntoIterator<Item = AudioFilter>) -> Self {
        let filters: Vec<AudioFilter> = filters.into_iter().collect();
        let (speed, chain) = compile(&filters);

        FilterGraph {
            filters,
            speed,
            chain,
        }
    }

    pub fn filters(&self) -> &[AudioFilter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Product of all tempo factors, 1.0 without any.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn chain_expression(&self) -> Option<&str> {
        self.chain.as_deref()
    }

    /// Decoder arguments for this graph: `-af <chain>`, or nothing at all.
    pub fn args(&self) -> Vec<String> {
        match &self.chain {
            Some(chain) => vec!["-af".to_string(), chain.clone()],
            None => vec![],
        }
    }
}

/// Ordered set of active filters holding at most one filter per kind.
#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    filters: Vec<AudioFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn contains(&self, kind: FilterKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn get(&self, kind: FilterKind) -> Option<&AudioFilter> {
        self.filters.iter().find(|f| f.kind() == kind)
    }

    pub fn as_slice(&self) -> &[AudioFilter] {
        &self.filters
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioFilter> {
        self.filters.iter()
    }

    /// Adds a filter, replacing the parameters of an active filter of the same
    /// kind in place. Returns the replaced filter.
    pub fn insert(&mut self, filter: AudioFilter) -> Option<AudioFilter> {
        match self.filters.iter_mut().find(|f| f.kind() == filter.kind()) {
            Some(existing) => Some(std::mem::replace(existing, filter)),
            None => {
                self.filters.push(filter);
                None
            }
        }
    }

    pub fn remove(&mut self, kind: FilterKind) -> Option<AudioFilter> {
        let index = self.filters.iter().position(|f| f.kind() == kind)?;
        Some(self.filters.remove(index))
    }

    /// Switches a filter on or off.
    ///
    /// An inactive kind is appended. An active kind is removed; adjustable
    /// kinds are then re-appended with the new parameters unless they did not
    /// change, so toggling the exact same values twice switches them off.
    /// Returns whether the kind is active afterwards.
    pub fn toggle(&mut self, filter: AudioFilter) -> bool {
        match self.remove(filter.kind()) {
            None => {
                self.filters.push(filter);
                true
            }
            Some(previous) => {
                if filter.kind().is_adjustable() && !previous.same_parameters(&filter) {
                    self.filters.push(filter);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn graph(&self) -> FilterGraph {
        FilterGraph::new(self.filters.clone())
    }
}

impl FromIterator<AudioFilter> for FilterSet {
    /// Later filters win over earlier ones of the same kind.
    fn from_iter<I: IntoIterator<Item = AudioFilter>>(iter: I) -> Self {
        let mut set = FilterSet::new();
        for filter in iter {
            set.insert(filter);
        }
        set
    }
}

/// Describes one filter type for the presentation layer: which values to ask
/// the user for, and how to build the filter from the raw answers.
pub struct FilterSpec {
    pub kind: FilterKind,
    pub label: &'static str,
    pub params: &'static [&'static str],
    pub build: fn(&[&str]) -> Result<AudioFilter, PlaybackError>,
}

pub static CATALOG: &[FilterSpec] = &[
    FilterSpec {
        kind: FilterKind::Reverse,
        label: "Reverse",
        params: &[],
        build: build_reverse,
    },
    FilterSpec {
        kind: FilterKind::Delay,
        label: "Delay",
        params: &[],
        build: build_delay,
    },
    FilterSpec {
        kind: FilterKind::Tempo,
        label: "Tempo",
        params: &["Tempo (1.0 - normal)"],
        build: build_tempo,
    },
    FilterSpec {
        kind: FilterKind::Volume,
        label: "Volume",
        params: &["Volume (1.0 - normal)"],
        build: build_volume,
    },
    FilterSpec {
        kind: FilterKind::Reverb,
        label: "Reverb",
        params: &[],
        build: build_reverb,
    },
];

pub fn spec_for(kind: FilterKind) -> &'static FilterSpec {
    // CATALOG is ordered by kind id
    &CATALOG[kind.id() as usize - 1]
}

fn build_reverse(_: &[&str]) -> Result<AudioFilter, PlaybackError> {
    Ok(AudioFilter::Reverse)
}

fn build_delay(_: &[&str]) -> Result<AudioFilter, PlaybackError> {
    Ok(AudioFilter::delay())
}

fn build_tempo(inputs: &[&str]) -> Result<AudioFilter, PlaybackError> {
    parse_param(FilterKind::Tempo, inputs, 0).map(AudioFilter::tempo)
}

fn build_volume(inputs: &[&str]) -> Result<AudioFilter, PlaybackError> {
    parse_param(FilterKind::Volume, inputs, 0).map(AudioFilter::volume)
}

fn build_reverb(_: &[&str]) -> Result<AudioFilter, PlaybackError> {
    Ok(AudioFilter::Reverb)
}

fn parse_param(kind: FilterKind, inputs: &[&str], index: usize) -> Result<f64, PlaybackError> {
    let label = spec_for(kind).params[index];
    let raw = inputs
        .get(index)
        .map(|input| input.trim())
        .filter(|input| !input.is_empty())
        .ok_or(PlaybackError::MissingFilterParameter {
            filter: kind,
            label,
        })?;

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PlaybackError::InvalidFilterParameter {
            filter: kind,
            label,
            value: raw.to_string(),
        }),
    }
}
