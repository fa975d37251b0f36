//! Per-instrument pricing bundle and the forward event schedule
//!
//! [`PricingData`] is built once per valuation and cloned by every
//! forward-pass worker; the clone carries the per-path state (fixed coupon
//! amounts, evaluator observations, basis accumulators). The
//! [`EventSchedule`] is shared read-only.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::year_fraction;
use crate::instrument::{BasisFunctions, CashflowNode, CashflowStream, ExerciseEvaluator, Instrument, LegSide};
use crate::market::Currency;
use crate::simulation::GridIndex;

use super::partition::{bucket_of, Partition};

/// How a leg's value is obtained on each path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegMode {
    /// Queried from the evaluator during the forward pass
    Analytic,
    /// Regressed from the leg's simulated cashflows
    Regression,
}

/// Which stream a cashflow node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Underlying,
    Leg(LegSide),
}

/// Cashflow node with its timing resolved against the partition
#[derive(Debug, Clone)]
pub struct NodeWrapper {
    pub node: CashflowNode,
    pub reset_time: f64,
    pub pay_time: f64,
    pub reset_index: GridIndex,
    pub pay_index: GridIndex,
    /// Coupon bucket receiving the paid amount
    pub bucket: usize,
    /// Amount fixed on the current path
    pub fixed_amount: Option<f64>,
}

/// Call or put leg of the instrument
#[derive(Debug, Clone)]
pub struct LegData {
    pub side: LegSide,
    pub evaluator: ExerciseEvaluator,
    pub mode: LegMode,
    /// Currency the leg's value is expressed in
    pub currency: Currency,
    pub nodes: Vec<NodeWrapper>,
}

impl LegData {
    pub fn is_cash_settled(&self) -> bool {
        self.evaluator.is_cash_settled()
    }

    /// Whether the leg needs a value at partition date with these flags
    pub fn needs_value(&self, partition: &Partition) -> bool {
        let flagged = match self.side {
            LegSide::Call => partition.flags.is_call_value_date(),
            LegSide::Put => partition.flags.is_put_value_date(),
        };
        flagged || !self.is_cash_settled()
    }
}

/// Immutable bundle with per-path mutable state
#[derive(Debug, Clone)]
pub struct PricingData {
    pub numeraire: Currency,
    pub natural: Currency,
    pub underlying: Vec<NodeWrapper>,
    pub call: Option<LegData>,
    pub put: Option<LegData>,
    pub credit_curve: Option<String>,
    pub basis: Option<Box<dyn BasisFunctions>>,
    pub basis_buffer: Vec<f64>,
}

fn wrap_nodes(
    stream: &CashflowStream,
    as_of: NaiveDate,
    partition: &[Partition],
    simulation_dates: &[NaiveDate],
) -> Vec<NodeWrapper> {
    stream
        .nodes()
        .iter()
        .filter(|n| n.pay_date > as_of)
        .map(|n| {
            // Fixings before the valuation date are taken from today's market
            let reset = n.reset_date.max(as_of);
            NodeWrapper {
                node: n.clone(),
                reset_time: year_fraction(as_of, reset),
                pay_time: year_fraction(as_of, n.pay_date),
                reset_index: GridIndex::locate(simulation_dates, reset),
                pay_index: GridIndex::locate(simulation_dates, n.pay_date),
                bucket: bucket_of(partition, n.pay_date),
                fixed_amount: None,
            }
        })
        .collect()
}

impl PricingData {
    pub fn new(
        instrument: &Instrument,
        numeraire: Currency,
        basis: Option<&dyn BasisFunctions>,
        as_of: NaiveDate,
        partition: &[Partition],
        simulation_dates: &[NaiveDate],
    ) -> Self {
        let natural = instrument.natural_currency();

        let make_leg = |side: LegSide| {
            instrument.leg(side).map(|evaluator| {
                let (mode, currency, nodes) = match evaluator.stream() {
                    Some(stream) => (
                        LegMode::Regression,
                        stream.currency(),
                        wrap_nodes(stream, as_of, partition, simulation_dates),
                    ),
                    None => (LegMode::Analytic, natural, Vec::new()),
                };
                LegData {
                    side,
                    evaluator: evaluator.clone(),
                    mode,
                    currency,
                    nodes,
                }
            })
        };

        let basis = basis.map(|b| b.clone_box());
        let dimension = basis.as_ref().map_or(0, |b| b.dimension());

        Self {
            numeraire,
            natural,
            underlying: wrap_nodes(&instrument.underlying, as_of, partition, simulation_dates),
            call: make_leg(LegSide::Call),
            put: make_leg(LegSide::Put),
            credit_curve: instrument.credit_curve.clone(),
            basis,
            basis_buffer: vec![0.0; dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.basis_buffer.len()
    }

    pub fn leg(&self, side: LegSide) -> Option<&LegData> {
        match side {
            LegSide::Call => self.call.as_ref(),
            LegSide::Put => self.put.as_ref(),
        }
    }

    pub fn leg_mut(&mut self, side: LegSide) -> Option<&mut LegData> {
        match side {
            LegSide::Call => self.call.as_mut(),
            LegSide::Put => self.put.as_mut(),
        }
    }

    pub fn nodes(&self, stream: StreamKind) -> &[NodeWrapper] {
        match stream {
            StreamKind::Underlying => &self.underlying,
            StreamKind::Leg(side) => self.leg(side).map(|l| l.nodes.as_slice()).unwrap_or(&[]),
        }
    }

    pub fn node_mut(&mut self, stream: StreamKind, index: usize) -> Option<&mut NodeWrapper> {
        match stream {
            StreamKind::Underlying => self.underlying.get_mut(index),
            StreamKind::Leg(side) => self.leg_mut(side).and_then(|l| l.nodes.get_mut(index)),
        }
    }

    /// Clear every piece of per-path state
    pub fn reset(&mut self) {
        let legs = self.call.iter_mut().chain(self.put.iter_mut());
        for leg in legs {
            leg.evaluator.reset();
            for node in leg.nodes.iter_mut() {
                node.fixed_amount = None;
            }
        }
        for node in self.underlying.iter_mut() {
            node.fixed_amount = None;
        }
        if let Some(basis) = self.basis.as_mut() {
            basis.reset();
        }
        self.basis_buffer.iter_mut().for_each(|x| *x = 0.0);
    }
}

/// Something that happens on an event date of the forward walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Fix the amount of a node
    Fix(StreamKind, usize),
    /// Realise the amount of a node into its coupon bucket
    Pay(StreamKind, usize),
    /// Record the state at a partition date
    Observe(usize),
}

/// All actions due on one date
#[derive(Debug, Clone)]
pub struct Event {
    pub date: NaiveDate,
    pub time: f64,
    pub grid: GridIndex,
    pub actions: Vec<Action>,
}

/// Date-ordered forward walk over partition, reset and pay dates
#[derive(Debug, Clone, Default)]
pub struct EventSchedule {
    pub events: Vec<Event>,
}

impl EventSchedule {
    pub fn new(data: &PricingData, partition: &[Partition]) -> Self {
        let mut raw: Vec<(NaiveDate, f64, GridIndex, u8, Action)> = Vec::new();

        for (j, p) in partition.iter().enumerate() {
            raw.push((p.date, p.time, p.simulation_index, 2, Action::Observe(j)));
        }

        let streams = [
            StreamKind::Underlying,
            StreamKind::Leg(LegSide::Call),
            StreamKind::Leg(LegSide::Put),
        ];
        for stream in streams {
            for (i, w) in data.nodes(stream).iter().enumerate() {
                let reset = w.node.reset_date.max(partition[0].date);
                raw.push((reset, w.reset_time, w.reset_index, 0, Action::Fix(stream, i)));
                raw.push((w.node.pay_date, w.pay_time, w.pay_index, 1, Action::Pay(stream, i)));
            }
        }

        // Fixings before payments before observations on a shared date
        raw.sort_by(|a, b| a.0.cmp(&b.0).then(a.3.cmp(&b.3)));

        let mut events: Vec<Event> = Vec::new();
        for (date, time, grid, _, action) in raw {
            match events.last_mut() {
                Some(event) if event.date == date => event.actions.push(action),
                _ => events.push(Event {
                    date,
                    time,
                    grid,
                    actions: vec![action],
                }),
            }
        }

        Self { events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{AnalyticPayoff, ExerciseSchedule};
    use crate::lsm::partition::{build_partition, PartitionInputs};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Instrument, Vec<Partition>, Vec<NaiveDate>) {
        let as_of = date(2025, 1, 1);
        let bond = CashflowStream::fixed_rate_bond(Currency::USD, date(2024, 1, 1), date(2027, 1, 1), 12, 5.0, 100.0).unwrap();
        let instrument = Instrument::new(1.0, bond).with_call(ExerciseEvaluator::AnalyticFormula {
            schedule: ExerciseSchedule::flat(vec![date(2026, 1, 1)], 0.0, true),
            payoff: AnalyticPayoff::Redemption { amount: 100.0 },
        });
        let sim = vec![as_of, date(2026, 1, 1), date(2027, 1, 1)];
        let inputs = PartitionInputs {
            as_of,
            report_dates: &[],
            last_cashflow_date: instrument.maturity(),
            call: Some(crate::lsm::partition::LegDates {
                exercise_dates: instrument.call.as_ref().unwrap().exercise_dates(),
                notify_dates: &[],
                replace_cashflow: false,
            }),
            put: None,
        };
        let partition = build_partition(&inputs, &sim);
        (instrument, partition, sim)
    }

    #[test]
    fn test_nodes_paid_before_as_of_dropped() {
        let (instrument, partition, sim) = setup();
        let data = PricingData::new(&instrument, Currency::USD, None, date(2025, 1, 1), &partition, &sim);

        // 2025-01-01 coupon is paid on the valuation date and excluded
        assert_eq!(data.underlying.len(), 3);
        assert_eq!(data.underlying[0].bucket, 1);
        assert_eq!(data.underlying[1].bucket, 2);
        assert_eq!(data.call.as_ref().unwrap().mode, LegMode::Analytic);
    }

    #[test]
    fn test_event_schedule_ordering() {
        let (instrument, partition, sim) = setup();
        let data = PricingData::new(&instrument, Currency::USD, None, date(2025, 1, 1), &partition, &sim);
        let schedule = EventSchedule::new(&data, &partition);

        for w in schedule.events.windows(2) {
            assert!(w[1].date > w[0].date);
        }
        let first = &schedule.events[0];
        assert_eq!(first.date, date(2025, 1, 1));
        assert_eq!(first.actions.last(), Some(&Action::Observe(0)));

        let year_one = schedule.events.iter().find(|e| e.date == date(2026, 1, 1)).unwrap();
        assert_eq!(year_one.actions.last(), Some(&Action::Observe(1)));
        assert!(matches!(year_one.actions[0], Action::Fix(StreamKind::Underlying, _)));
    }

    #[test]
    fn test_reset_clears_path_state() {
        let (instrument, partition, sim) = setup();
        let mut data = PricingData::new(&instrument, Currency::USD, None, date(2025, 1, 1), &partition, &sim);
        data.underlying[0].fixed_amount = Some(5.0);
        data.reset();
        assert!(data.underlying.iter().all(|n| n.fixed_amount.is_none()));
    }
}
