use crate::parser::analyzer::MatchAnalyzer;
use crate::parser::entity::{EntityBinder, EntityTable, Listener, PositionedBase, PropertyUpdate};
use crate::parser::events::{Event, NadeEvent};
use crate::parser::game::{EntityId, Vector, HE_DAMAGE_RADIUS};
use crate::parser::props::*;
use crate::schema::ClassTable;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum DetonateState {
    #[default]
    PreDetonate,
    Detonating,
    Detonated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetonateKind {
    Fire,
    Smoke,
    /// `flag_time` is when the flags first showed up, some time before the
    /// decoy starts making noise.
    Decoy { flag_time: Option<f32> },
    /// HE and flashbang projectiles share a class, the radius tells them apart.
    Projectile {
        damage_radius: f32,
        explosive: Option<bool>,
    },
}

impl DetonateKind {
    pub fn for_class(name: &str) -> Option<Self> {
        match name {
            "CInferno" => Some(DetonateKind::Fire),
            "CSmokeGrenadeProjectile" => Some(DetonateKind::Smoke),
            "CDecoyProjectile" => Some(DetonateKind::Decoy { flag_time: None }),
            "CBaseCSGrenadeProjectile" => Some(DetonateKind::Projectile {
                damage_radius: 0.0,
                explosive: None,
            }),
            _ => None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            DetonateKind::Fire => "CInferno",
            DetonateKind::Smoke => "CSmokeGrenadeProjectile",
            DetonateKind::Decoy { .. } => "CDecoyProjectile",
            DetonateKind::Projectile { .. } => "CBaseCSGrenadeProjectile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetonateProp {
    DidSmokeEffect,
    Flags,
    DamageRadius,
}

/// What gets reported for a grenade effect. Replaced wholesale once the
/// server reports the effect itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NadeState {
    pub thrower: Option<EntityId>,
    pub position: Vector,
    /// Derived from entity state, the position follows the entity.
    pub interpolated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetonateEntity {
    pub id: EntityId,
    pub base: PositionedBase,
    pub state: DetonateState,
    pub kind: DetonateKind,
    pub nade: NadeState,
}

impl DetonateEntity {
    pub fn new(id: EntityId, kind: DetonateKind) -> Self {
        DetonateEntity {
            id,
            base: PositionedBase::default(),
            state: DetonateState::PreDetonate,
            kind,
            nade: NadeState {
                interpolated: true,
                ..Default::default()
            },
        }
    }

    /// An effect first seen through its server event, before the entity.
    pub fn reported(id: EntityId, kind: DetonateKind, nade: NadeState) -> Self {
        DetonateEntity {
            state: DetonateState::Detonating,
            nade,
            ..DetonateEntity::new(id, kind)
        }
    }

    pub fn set_owner(&mut self, owner: Option<EntityId>) {
        self.base.owner = owner;
        self.nade.thrower = owner;
    }

    pub fn position(&self, cell_width: i32) -> Vector {
        if self.nade.interpolated {
            self.base.position(cell_width)
        } else {
            self.nade.position
        }
    }
}

impl MatchAnalyzer {
    pub(crate) fn bind_detonate(&mut self, binder: &mut EntityBinder<'_>, kind: DetonateKind) {
        let id = binder.id();
        PositionedBase::bind(binder);

        match kind {
            DetonateKind::Fire => {
                if self.detonates.contains_key(&id) {
                    // burning already reported, this adds the owner
                    self.interp_detonates.push_back(id);
                    return;
                }
                // the inferno shows up on the same tick as its event, but after it
                self.interp_detonates.push_back(id);
            }
            DetonateKind::Smoke => {
                binder.bind(DID_SMOKE_EFFECT, Listener::Detonate(DetonateProp::DidSmokeEffect));
            }
            DetonateKind::Decoy { .. } => {
                binder.bind(FLAGS, Listener::Detonate(DetonateProp::Flags));
            }
            DetonateKind::Projectile { .. } => {
                binder.bind(DAMAGE_RADIUS, Listener::Detonate(DetonateProp::DamageRadius));
            }
        }
        self.detonates.insert(id, DetonateEntity::new(id, kind));
    }

    pub(crate) fn handle_detonate_prop(
        &mut self,
        id: EntityId,
        prop: DetonateProp,
        update: PropertyUpdate<'_>,
    ) {
        let current_time = self.tick.current_time;
        let Some(det) = self.detonates.get_mut(&id) else {
            return;
        };
        let pre_detonate = det.state == DetonateState::PreDetonate;

        match (prop, &mut det.kind) {
            (DetonateProp::DidSmokeEffect, DetonateKind::Smoke) => {
                // same tick as smokegrenade_detonate
                if update.value.as_int() == Some(1) && pre_detonate {
                    self.interp_detonates.push_back(id);
                }
            }
            (DetonateProp::Flags, DetonateKind::Decoy { flag_time }) => {
                if update.value.as_int() == Some(1) && pre_detonate {
                    *flag_time = Some(current_time);
                }
            }
            (
                DetonateProp::DamageRadius,
                DetonateKind::Projectile {
                    damage_radius,
                    explosive,
                },
            ) => {
                if let Some(radius) = update.value.as_float() {
                    // the radius can still change after the entity showed up
                    *damage_radius = radius;
                    *explosive = Some(radius == HE_DAMAGE_RADIUS);
                    trace!("Projectile {id} explosive: {explosive:?}");
                }
            }
            (prop, kind) => trace!("Unhandled {prop:?} for {kind:?}"),
        }
    }

    pub(crate) fn nade_event(&self, det: &DetonateEntity, interpolated: bool) -> NadeEvent {
        NadeEvent {
            entity_id: Some(det.id),
            thrown_by: det.nade.thrower.and_then(|id| self.player_ref(id)),
            position: det.position(self.cell_width),
            interpolated,
        }
    }

    /// Raise the start of every effect queued on an earlier tick.
    pub(crate) fn start_queued_detonates(&mut self) {
        while let Some(id) = self.interp_detonates.pop_front() {
            let Some(det) = self.detonates.get(&id) else {
                continue;
            };
            let pre_detonate = det.state == DetonateState::PreDetonate;
            let nade = self.nade_event(det, det.nade.interpolated);

            let event = match det.kind {
                DetonateKind::Fire => Event::FireNadeWithOwnerStarted(nade),
                DetonateKind::Smoke if pre_detonate => Event::SmokeNadeStarted(nade),
                DetonateKind::Decoy { .. } if pre_detonate => Event::DecoyNadeStarted(nade),
                _ => continue,
            };
            if let Some(det) = self.detonates.get_mut(&id) {
                det.state = DetonateState::Detonating;
            }
            self.emit(event);
        }
    }

    /// Ids can be reused by another class without the old entity being
    /// removed first.
    pub(crate) fn sweep_replaced_detonates(&mut self, entities: &EntityTable, classes: &ClassTable) {
        let replaced: Vec<EntityId> = self
            .detonates
            .values()
            .filter(|det| {
                entities
                    .class_name(det.id, classes)
                    .is_some_and(|name| name != det.kind.class_name())
            })
            .map(|det| det.id)
            .collect();

        for id in replaced {
            self.pop_detonate(id);
        }
    }

    pub(crate) fn queue_stalled_decoys(&mut self) {
        let now = self.tick.current_time;
        let threshold = self.config.decoy_start_threshold;
        for det in self.detonates.values() {
            if let DetonateKind::Decoy {
                flag_time: Some(flag_time),
            } = det.kind
            {
                if det.state == DetonateState::PreDetonate && now - flag_time > threshold {
                    debug!("Decoy {} never reported its start", det.id);
                    self.interp_detonates.push_back(det.id);
                }
            }
        }
    }

    /// Drop an effect whose entity is gone. Effects that never started, and
    /// projectiles whose detonation was never reported, vanish silently.
    pub(crate) fn pop_detonate(&mut self, id: EntityId) {
        let Some(det) = self.detonates.remove(&id) else {
            return;
        };
        if det.state == DetonateState::PreDetonate {
            trace!("{:?} {id} removed before detonating", det.kind);
            return;
        }

        let nade = self.nade_event(&det, true);
        let event = match det.kind {
            DetonateKind::Fire => Event::FireNadeEnded(nade),
            DetonateKind::Smoke => Event::SmokeNadeEnded(nade),
            DetonateKind::Decoy { .. } => Event::DecoyNadeEnded(nade),
            DetonateKind::Projectile { .. } => return,
        };
        self.emit(event);
    }
}
