//! Reconciles reported damage with observed health changes.
//!
//! Some damage never shows up as a `player_hurt` event (bomb, falls) and
//! some hurt events carry the wrong amount. Every tick the health lost by
//! each player and the damage each player is credited with on the
//! scoreboard are compared with the queued hurt events, and whatever is
//! left over is attributed by a few fallback rules.

use crate::parser::game::EntityId;
use crate::parser::weapon::EquipmentElement;
use fnv::FnvHashMap;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

fn set_inflicted(dmg_change: &mut BTreeMap<EntityId, i32>, attacker: EntityId, amount: i32) {
    if amount > 0 {
        dmg_change.insert(attacker, amount);
    } else {
        dmg_change.remove(&attacker);
    }
}

/// Damage reported by a raw event, waiting for the end of the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedHurt {
    pub attacker: Option<EntityId>,
    pub victim: EntityId,
    pub amount: i32,
    pub weapon: EquipmentElement,
}

/// Damage the raw events did not account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferredHurt {
    pub victim: EntityId,
    pub attacker: Option<EntityId>,
    pub amount: i32,
    pub weapon: EquipmentElement,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileContext {
    /// Warmup or a paused match, nothing is attributed.
    pub suspended: bool,
    /// Scoreboard damage is only reliable for the first 30 rounds.
    pub track_inflicted: bool,
    /// Set when the bomb exploded this tick, holding its planter.
    pub bomb_exploded: Option<Option<EntityId>>,
    pub relax: bool,
}

#[derive(Debug, Default)]
pub struct DamageAttribution {
    // both keyed by player entity id
    hp_change: BTreeMap<EntityId, i32>,
    dmg_change: BTreeMap<EntityId, i32>,
    round_damage: FnvHashMap<EntityId, FnvHashMap<i32, i32>>,
    queued: VecDeque<QueuedHurt>,
}

impl DamageAttribution {
    pub fn record_health_loss(&mut self, victim: EntityId, loss: i32) {
        if loss > 0 {
            self.hp_change.insert(victim, loss);
        }
    }

    /// Feed one `m_iMatchStats_Damage.NNN` update.
    ///
    /// The slot for the round being played is only trusted when it is within
    /// one of the rounds-played counter, the neighbours show up around round
    /// ends and restarts.
    pub fn record_round_damage(
        &mut self,
        attacker: EntityId,
        round: i32,
        value: i32,
        rounds_played: i32,
    ) {
        if (round - rounds_played).abs() > 1 {
            return;
        }

        match self.round_damage.get_mut(&attacker) {
            Some(rounds) => {
                let previous = rounds.get(&(round - 1)).copied().unwrap_or(0);
                let current = rounds.get(&round).copied().unwrap_or(0);
                rounds.clear();
                rounds.insert(round - 1, previous);

                if current > 0 && value > 0 {
                    set_inflicted(&mut self.dmg_change, attacker, value - current);
                } else if value > 0 {
                    set_inflicted(&mut self.dmg_change, attacker, value);
                }
                rounds.insert(round, value);
            }
            None => {
                if value > 0 {
                    self.set_inflicted(attacker, value);
                }
                let mut rounds = FnvHashMap::default();
                rounds.insert(round, value);
                self.round_damage.insert(attacker, rounds);
            }
        }
    }

    fn set_inflicted(&mut self, attacker: EntityId, amount: i32) {
        set_inflicted(&mut self.dmg_change, attacker, amount);
    }

    pub fn queue(&mut self, hurt: QueuedHurt) {
        self.queued.push_back(hurt);
    }

    /// Damage already queued against `victim` this tick.
    pub fn queued_damage(&self, victim: EntityId) -> i32 {
        self.queued
            .iter()
            .filter(|h| h.victim == victim)
            .map(|h| h.amount)
            .sum()
    }

    /// Forget everything, including the per round scoreboard history.
    pub fn reset(&mut self) {
        self.clear_tick();
        self.round_damage.clear();
    }

    fn clear_tick(&mut self) {
        self.hp_change.clear();
        self.dmg_change.clear();
        self.queued.clear();
    }

    /// Run the end of tick reconciliation. Hurts for the same victim come
    /// out next to each other, in the order they were resolved.
    pub fn reconcile(&mut self, ctx: &ReconcileContext) -> Vec<InferredHurt> {
        let mut out = Vec::new();
        if ctx.suspended || self.hp_change.is_empty() {
            self.clear_tick();
            return out;
        }

        while let Some(hurt) = self.queued.pop_front() {
            let loss = self.hp_change.entry(hurt.victim).or_insert(0);
            *loss -= hurt.amount;
            if *loss == 0 {
                self.hp_change.remove(&hurt.victim);
            }

            let environmental = matches!(
                hurt.weapon,
                EquipmentElement::World | EquipmentElement::Bomb
            );
            if !environmental && ctx.track_inflicted {
                if let Some(attacker) = hurt.attacker {
                    if let Some(dmg) = self.dmg_change.get_mut(&attacker) {
                        *dmg -= hurt.amount;
                        if *dmg == 0 {
                            self.dmg_change.remove(&attacker);
                        }
                    }
                }
            }
        }

        // over-explained entries carry nothing left to attribute
        self.hp_change.retain(|_, loss| *loss > 0);
        self.dmg_change.retain(|_, dmg| *dmg > 0);

        if ctx.relax {
            self.match_equal_amounts(&mut out);
        }

        if self.hp_change.len() > 1 && self.dmg_change.len() > 1 {
            debug!(
                "Dropping ambiguous damage: {} victims, {} attackers",
                self.hp_change.len(),
                self.dmg_change.len()
            );
        } else if !self.hp_change.is_empty() {
            self.attribute_residual(ctx, &mut out);
        }

        self.clear_tick();
        out
    }

    fn match_equal_amounts(&mut self, out: &mut Vec<InferredHurt>) {
        let mut matched = Vec::new();
        for (&victim, &loss) in &self.hp_change {
            let mut candidates = self.dmg_change.iter().filter(|(_, dmg)| **dmg == loss);
            if let (Some((&attacker, _)), None) = (candidates.next(), candidates.next()) {
                if matched.iter().any(|(_, a)| *a == attacker) {
                    continue;
                }
                matched.push((victim, attacker));
                out.push(InferredHurt {
                    victim,
                    attacker: Some(attacker),
                    amount: loss,
                    weapon: EquipmentElement::Unknown,
                });
            }
        }
        for (victim, attacker) in matched {
            self.hp_change.remove(&victim);
            self.dmg_change.remove(&attacker);
        }
    }

    fn attribute_residual(&self, ctx: &ReconcileContext, out: &mut Vec<InferredHurt>) {
        let hp_sum: i32 = self.hp_change.values().sum();
        let dmg_sum: i32 = self.dmg_change.values().sum();

        if hp_sum > dmg_sum && self.hp_change.len() > 1 && !self.dmg_change.is_empty() {
            debug!("Dropping mixed player and environment damage: {hp_sum} > {dmg_sum}");
            return;
        }

        if let (1, Some((&victim, &loss))) = (self.hp_change.len(), self.hp_change.iter().next()) {
            let mut left = loss;
            for (&attacker, &dmg) in &self.dmg_change {
                if left == 0 {
                    break;
                }
                // which weapon did it cannot be told apart here
                let amount = dmg.min(left);
                out.push(InferredHurt {
                    victim,
                    attacker: Some(attacker),
                    amount,
                    weapon: EquipmentElement::Unknown,
                });
                left -= amount;
            }
            if left > 0 {
                out.push(environment_hurt(victim, left, ctx));
            }
        } else if self.dmg_change.is_empty() {
            for (&victim, &loss) in &self.hp_change {
                out.push(environment_hurt(victim, loss, ctx));
            }
        } else if let Some(&attacker) = self.dmg_change.keys().next() {
            for (&victim, &loss) in &self.hp_change {
                out.push(InferredHurt {
                    victim,
                    attacker: Some(attacker),
                    amount: loss,
                    weapon: EquipmentElement::Unknown,
                });
            }
        }
    }
}

/// Bomb damage when it went off this tick, otherwise the world hurt the
/// player by themselves.
fn environment_hurt(victim: EntityId, amount: i32, ctx: &ReconcileContext) -> InferredHurt {
    match ctx.bomb_exploded {
        Some(planter) => InferredHurt {
            victim,
            attacker: planter,
            amount,
            weapon: EquipmentElement::Bomb,
        },
        None => InferredHurt {
            victim,
            attacker: Some(victim),
            amount,
            weapon: EquipmentElement::World,
        },
    }
}
