//! Season Monte Carlo simulator.
//!
//! The remaining schedule is rolled out N times from a frozen snapshot of Elo
//! ratings. Work is split into fixed-size chunks, each seeded from the base
//! seed and its index, run on the rayon pool and merged in chunk order, so a
//! given seed produces the same odds regardless of thread count.

use crate::config::Config;
use crate::db::models::{SeasonSchedule, SeasonSimulationResult, StandingRow};
use crate::engine::models::monte_carlo::stable_seed;
use crate::engine::ratings::elo_expected;
use crate::error::EngineError;
use chrono::{NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

const REGULATION_SHARE: f64 = 0.85;
const OVERTIME_SHARE: f64 = 0.10;
const PERCENTILES: [u8; 5] = [10, 25, 50, 75, 90];
/// Simulated-game probabilities are kept inside this band.
const PROBABILITY_BAND: (f64, f64) = (0.05, 0.95);

#[derive(Debug, Clone, Copy)]
pub struct SeasonParams {
    pub home_advantage: f64,
    pub rest_perturbation: f64,
    pub division_shrink: f64,
    pub division_spots: usize,
    pub wild_cards: usize,
    pub chunk_size: usize,
}

impl SeasonParams {
    pub fn from_config(config: &Config) -> Self {
        SeasonParams {
            home_advantage: config.elo_home_advantage,
            rest_perturbation: config.rest_perturbation,
            division_shrink: config.division_shrink,
            division_spots: config.division_spots,
            wild_cards: config.wild_cards,
            chunk_size: config.season_chunk_size,
        }
    }
}

/// A remaining game reduced to team indices and a fixed home-win probability.
#[derive(Debug, Clone, Copy)]
struct SimGame {
    home: usize,
    away: usize,
    p_home: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Line {
    points: u32,
    games_played: u32,
    regulation_wins: u32,
    regulation_ot_wins: u32,
    wins: u32,
}

#[derive(Debug, Default)]
struct ChunkTally {
    playoffs: usize,
    division: usize,
    wild_card: usize,
    rank_sum: u64,
    points: Vec<u32>,
}

/// Home-win probability of one scheduled game before any random draw.
pub fn game_probability(
    home_elo: f64,
    away_elo: f64,
    home_rest: Option<i64>,
    away_rest: Option<i64>,
    same_division: bool,
    params: &SeasonParams,
) -> f64 {
    let mut p = elo_expected(home_elo + params.home_advantage, away_elo);
    if let (Some(h), Some(a)) = (home_rest, away_rest) {
        if h - a > 1 {
            p += params.rest_perturbation;
        } else if a - h > 1 {
            p -= params.rest_perturbation;
        } else if h == 0 && a > 0 {
            p -= params.rest_perturbation;
        } else if a == 0 && h > 0 {
            p += params.rest_perturbation;
        }
    }
    if same_division {
        p = 0.5 + (p - 0.5) * params.division_shrink;
    }
    p.clamp(PROBABILITY_BAND.0, PROBABILITY_BAND.1)
}

/// Standings order: points, fewer games played, regulation wins, regulation
/// plus overtime wins, wins, goal differential, goals for, team code.
fn compare(a: usize, b: usize, lines: &[Line], base: &[StandingRow]) -> Ordering {
    let (la, lb) = (&lines[a], &lines[b]);
    let (sa, sb) = (&base[a], &base[b]);
    let gd = |s: &StandingRow| s.goals_for as i64 - s.goals_against as i64;
    lb.points
        .cmp(&la.points)
        .then(la.games_played.cmp(&lb.games_played))
        .then(lb.regulation_wins.cmp(&la.regulation_wins))
        .then(lb.regulation_ot_wins.cmp(&la.regulation_ot_wins))
        .then(lb.wins.cmp(&la.wins))
        .then(gd(sb).cmp(&gd(sa)))
        .then(sb.goals_for.cmp(&sa.goals_for))
        .then(sa.team_code.cmp(&sb.team_code))
}

pub struct SeasonSimulator<'a> {
    standings: &'a [StandingRow],
    games: Vec<SimGame>,
    target: usize,
    conference: Vec<usize>,
    divisions: Vec<Vec<usize>>,
    params: SeasonParams,
}

impl<'a> SeasonSimulator<'a> {
    /// Prepare a rollout for `team` from the schedule and an Elo lookup.
    pub fn new(
        team: &str,
        schedule: &'a SeasonSchedule,
        elo: &HashMap<String, f64>,
        params: SeasonParams,
    ) -> Result<Self, EngineError> {
        let standings = schedule.standings.as_slice();
        let index: HashMap<&str, usize> = standings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.team_code.as_str(), i))
            .collect();
        let target = *index
            .get(team)
            .ok_or_else(|| EngineError::RatingsUnavailable(format!("{team} is not in the standings")))?;

        let rating = |i: usize| {
            elo.get(&standings[i].team_code)
                .copied()
                .ok_or_else(|| EngineError::RatingsUnavailable(format!("no rating for {}", standings[i].team_code)))
        };

        let mut ordered: Vec<_> = schedule.remaining_games.iter().collect();
        ordered.sort_by_key(|g| g.game_date);
        let mut last_played: HashMap<usize, NaiveDate> = HashMap::new();
        let mut games = Vec::with_capacity(ordered.len());
        for g in ordered {
            let (Some(&home), Some(&away)) = (index.get(g.home_team.as_str()), index.get(g.away_team.as_str())) else {
                continue;
            };
            let rest = |i: usize| last_played.get(&i).map(|d| (g.game_date - *d).num_days() - 1);
            let p_home = game_probability(
                rating(home)?,
                rating(away)?,
                rest(home),
                rest(away),
                standings[home].division == standings[away].division,
                &params,
            );
            last_played.insert(home, g.game_date);
            last_played.insert(away, g.game_date);
            games.push(SimGame { home, away, p_home });
        }

        let conf_name = &standings[target].conference;
        let conference: Vec<usize> = (0..standings.len())
            .filter(|&i| &standings[i].conference == conf_name)
            .collect();
        let mut by_division: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for &i in &conference {
            by_division.entry(standings[i].division.as_str()).or_default().push(i);
        }

        Ok(SeasonSimulator {
            standings,
            games,
            target,
            conference,
            divisions: by_division.into_values().collect(),
            params,
        })
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    fn simulate_once(&self, rng: &mut StdRng, lines: &mut [Line]) {
        for (line, row) in lines.iter_mut().zip(self.standings) {
            *line = Line {
                points: row.points,
                games_played: row.games_played,
                regulation_wins: row.regulation_wins,
                regulation_ot_wins: row.regulation_ot_wins,
                wins: row.wins,
            };
        }
        for game in &self.games {
            let home_wins = rng.gen::<f64>() < game.p_home;
            let (winner, loser) = if home_wins {
                (game.home, game.away)
            } else {
                (game.away, game.home)
            };
            let kind: f64 = rng.gen();
            lines[winner].points += 2;
            lines[winner].wins += 1;
            if kind < REGULATION_SHARE {
                lines[winner].regulation_wins += 1;
                lines[winner].regulation_ot_wins += 1;
            } else {
                if kind < REGULATION_SHARE + OVERTIME_SHARE {
                    lines[winner].regulation_ot_wins += 1;
                }
                lines[loser].points += 1;
            }
            lines[winner].games_played += 1;
            lines[loser].games_played += 1;
        }
    }

    /// `(in division spots, wild card, conference rank)` of the target team.
    fn classify(&self, lines: &[Line]) -> (bool, bool, usize) {
        let mut division_qualifiers = Vec::new();
        let mut in_division = false;
        for division in &self.divisions {
            let mut order = division.clone();
            order.sort_by(|&a, &b| compare(a, b, lines, self.standings));
            let top = &order[..self.params.division_spots.min(order.len())];
            in_division |= top.contains(&self.target);
            division_qualifiers.extend_from_slice(top);
        }

        let mut conference = self.conference.clone();
        conference.sort_by(|&a, &b| compare(a, b, lines, self.standings));
        let rank = conference.iter().position(|&i| i == self.target).unwrap_or(0) + 1;

        let wild_card = !in_division
            && conference
                .iter()
                .filter(|i| !division_qualifiers.contains(i))
                .take(self.params.wild_cards)
                .any(|&i| i == self.target);
        (in_division, wild_card, rank)
    }

    fn run_chunk(&self, seed: u64, seasons: usize, cancel: &AtomicBool) -> Option<ChunkTally> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut lines = vec![Line::default(); self.standings.len()];
        let mut tally = ChunkTally {
            points: Vec::with_capacity(seasons),
            ..Default::default()
        };
        for _ in 0..seasons {
            if cancel.load(AtomicOrdering::Relaxed) {
                return None;
            }
            self.simulate_once(&mut rng, &mut lines);
            let (division, wild_card, rank) = self.classify(&lines);
            tally.division += division as usize;
            tally.wild_card += wild_card as usize;
            tally.playoffs += (division || wild_card) as usize;
            tally.rank_sum += rank as u64;
            tally.points.push(lines[self.target].points);
        }
        Some(tally)
    }

    /// Run `n` seasons. Returns `Cancelled` as soon as `cancel` is observed;
    /// partial work is discarded.
    pub fn run(&self, n: usize, seed: u64, cancel: &AtomicBool) -> Result<SeasonSimulationResult, EngineError> {
        let chunk = self.params.chunk_size.max(1);
        let chunks: Vec<(u64, usize)> = (0..n.div_ceil(chunk))
            .map(|i| (chunk_seed(seed, i), chunk.min(n - i * chunk)))
            .collect();

        let tallies = chunks
            .par_iter()
            .map(|&(stream, seasons)| self.run_chunk(stream, seasons, cancel))
            .collect::<Option<Vec<_>>>()
            .ok_or(EngineError::Cancelled)?;

        let mut total = ChunkTally::default();
        for t in tallies {
            total.playoffs += t.playoffs;
            total.division += t.division;
            total.wild_card += t.wild_card;
            total.rank_sum += t.rank_sum;
            total.points.extend(t.points);
        }
        Ok(summarize(&self.standings[self.target].team_code, n, total))
    }
}

/// RNG seed of chunk `index` within a run seeded with `seed`. Hashing keeps
/// runs with nearby seeds from sharing chunk streams.
pub fn chunk_seed(seed: u64, index: usize) -> u64 {
    stable_seed(&[&seed.to_string(), &index.to_string()])
}

fn summarize(team: &str, n: usize, mut total: ChunkTally) -> SeasonSimulationResult {
    let nf = n.max(1) as f64;
    let mut distribution = BTreeMap::new();
    for p in &total.points {
        *distribution.entry(*p).or_insert(0usize) += 1;
    }
    total.points.sort_unstable();
    let percentile = |pct: u8| {
        if total.points.is_empty() {
            return 0;
        }
        let rank = ((pct as f64 / 100.0) * total.points.len() as f64).ceil() as usize;
        total.points[rank.clamp(1, total.points.len()) - 1]
    };

    SeasonSimulationResult {
        team_code: team.to_string(),
        simulations: n,
        playoff_odds: total.playoffs as f64 / nf,
        division_odds: total.division as f64 / nf,
        wild_card_odds: total.wild_card as f64 / nf,
        average_points: total.points.iter().map(|&p| p as f64).sum::<f64>() / nf,
        best_case_points: total.points.last().copied().unwrap_or(0),
        worst_case_points: total.points.first().copied().unwrap_or(0),
        average_conference_rank: total.rank_sum as f64 / nf,
        percentile_points: PERCENTILES.iter().map(|&p| (p, percentile(p))).collect(),
        points_distribution: distribution,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use crate::db::models::ScheduledGame;
    use approx::assert_relative_eq;

    /// One conference, two divisions of six, each pair playing home and away.
    pub(crate) fn league() -> (SeasonSchedule, HashMap<String, f64>) {
        let codes = ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF", "GGG", "HHH", "III", "JJJ", "KKK", "LLL"];
        let standings: Vec<StandingRow> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| StandingRow {
                team_code: code.to_string(),
                conference: "East".into(),
                division: if i < 6 { "Atlantic".into() } else { "Metro".into() },
                games_played: 60,
                wins: 30,
                regulation_wins: 24,
                regulation_ot_wins: 28,
                points: 68,
                goals_for: 190,
                goals_against: 185,
            })
            .collect();
        let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let mut remaining = Vec::new();
        let mut day = 0;
        for (i, h) in codes.iter().enumerate() {
            for (j, a) in codes.iter().enumerate() {
                if i != j {
                    remaining.push(ScheduledGame {
                        home_team: h.to_string(),
                        away_team: a.to_string(),
                        game_date: start + chrono::Duration::days(day),
                    });
                    day += 1;
                }
            }
        }
        let elo = codes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), 1600.0 - 15.0 * i as f64))
            .collect();
        (
            SeasonSchedule {
                standings,
                remaining_games: remaining,
            },
            elo,
        )
    }

    fn params() -> SeasonParams {
        SeasonParams::from_config(&Config::defaults())
    }

    #[test]
    fn same_seed_same_odds() {
        let (schedule, elo) = league();
        let sim = SeasonSimulator::new("EEE", &schedule, &elo, params()).unwrap();
        let cancel = AtomicBool::new(false);
        let a = sim.run(5000, 42, &cancel).unwrap();
        let b = sim.run(5000, 42, &cancel).unwrap();
        assert_eq!(a.playoff_odds, b.playoff_odds);
        assert_eq!(a.points_distribution, b.points_distribution);
        assert_eq!(a.average_conference_rank, b.average_conference_rank);
    }

    #[test]
    fn adjacent_seeds_share_no_chunk_stream() {
        let first: HashSet<u64> = (0..200).map(|i| chunk_seed(99, i)).collect();
        let next: HashSet<u64> = (0..200).map(|i| chunk_seed(100, i)).collect();
        assert_eq!(first.len(), 200);
        assert!(first.is_disjoint(&next));

        let (schedule, elo) = league();
        let sim = SeasonSimulator::new("EEE", &schedule, &elo, params()).unwrap();
        let cancel = AtomicBool::new(false);
        let a = sim.run(5000, 99, &cancel).unwrap();
        let b = sim.run(5000, 100, &cancel).unwrap();
        assert_ne!(a.points_distribution, b.points_distribution);
    }

    #[test]
    fn more_simulations_converge() {
        let (schedule, elo) = league();
        let sim = SeasonSimulator::new("FFF", &schedule, &elo, params()).unwrap();
        let cancel = AtomicBool::new(false);
        let small = sim.run(500, 7, &cancel).unwrap();
        let large = sim.run(20_000, 7, &cancel).unwrap();
        assert!((small.playoff_odds - large.playoff_odds).abs() < 0.1);
        assert!((small.average_points - large.average_points).abs() < 1.0);
    }

    #[test]
    fn odds_are_consistent() {
        let (schedule, elo) = league();
        let sim = SeasonSimulator::new("AAA", &schedule, &elo, params()).unwrap();
        let r = sim.run(2000, 1, &AtomicBool::new(false)).unwrap();
        assert_relative_eq!(r.playoff_odds, r.division_odds + r.wild_card_odds, epsilon = 1e-12);
        assert!(r.playoff_odds > 0.5, "top seed odds {}", r.playoff_odds);
        assert!(r.worst_case_points >= 68 && r.best_case_points <= 68 + 44);
        assert!(r.percentile_points[&10] <= r.percentile_points[&90]);
        assert_eq!(r.points_distribution.values().sum::<usize>(), 2000);
    }

    #[test]
    fn cancelled_run_discards_work() {
        let (schedule, elo) = league();
        let sim = SeasonSimulator::new("AAA", &schedule, &elo, params()).unwrap();
        let err = sim.run(1000, 1, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn unknown_team_is_unavailable() {
        let (schedule, elo) = league();
        assert!(matches!(
            SeasonSimulator::new("ZZZ", &schedule, &elo, params()),
            Err(EngineError::RatingsUnavailable(_))
        ));
    }

    #[test]
    fn division_games_shrink_toward_even() {
        let p = params();
        let open = game_probability(1600.0, 1400.0, None, None, false, &p);
        let division = game_probability(1600.0, 1400.0, None, None, true, &p);
        assert!(division < open);
        assert_relative_eq!(division, 0.5 + (open - 0.5) * 0.9, epsilon = 1e-12);
    }

    #[test]
    fn rest_mismatch_perturbs_probability() {
        let p = params();
        let base = game_probability(1500.0, 1500.0, Some(1), Some(1), false, &p);
        let rested = game_probability(1500.0, 1500.0, Some(3), Some(0), false, &p);
        let tired = game_probability(1500.0, 1500.0, Some(0), Some(2), false, &p);
        assert_relative_eq!(rested - base, 0.03, epsilon = 1e-12);
        assert_relative_eq!(base - tired, 0.03, epsilon = 1e-12);
    }

    #[test]
    fn tiebreak_prefers_fewer_games_then_code() {
        let (schedule, _) = league();
        let base = &schedule.standings;
        let mut lines = vec![Line::default(); base.len()];
        lines[0] = Line { points: 80, games_played: 70, ..Default::default() };
        lines[1] = Line { points: 80, games_played: 69, ..Default::default() };
        assert_eq!(compare(0, 1, &lines, base), Ordering::Greater);
        lines[1].games_played = 70;
        assert_eq!(compare(0, 1, &lines, base), Ordering::Less);
    }
}
