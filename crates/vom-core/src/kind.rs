//! # Kinds and Representatives
//!
//! A kind is a class of virtual objects sharing one instance-kit maker. Each
//! instance has a durable identity `o+<kindID>/<instance>`, a state record
//! and, while anyone in the vat holds it, exactly one `Representative`.
//!
//! ## Construction
//!
//! `KindMaker::make` allocates the next instance id, hands a fresh `State`
//! to the kind's maker, registers the record with the cache as under
//! construction and runs the kit's initializer. During that time `State` is
//! a plain property map. Afterwards every property is marshaled; only when
//! all of them succeed is the object registered, its state written to the
//! cache as dirty and `State` switched to reading and writing through the
//! cache. Any failure leaves no trace of the object.
//!
//! ## Reanimation
//!
//! When a vref of a virtual object is unserialized and no representative is
//! live, the kind's maker is run again over an already-active `State`. The
//! kit's initializer is discarded.

use crate::cache::InnerSelf;
use crate::manager::VirtualObjectManager;
use crate::slots::{make_virtual_slot, parse_vat_slot};
use crate::store::RawState;
use crate::{Reference, Value, VomError, VomResult, marshal};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// A behavior of a virtual object.
pub type Method = Box<dyn Fn(&[Value]) -> VomResult<Value>>;

/// One-shot initializer run with the construction arguments.
pub type Initializer = Box<dyn FnOnce(&[Value]) -> VomResult<()>>;

/// The product of a kind's maker: an optional initializer plus the methods
/// of the representative.
#[derive(Default)]
pub struct InstanceKit {
    init: Option<Initializer>,
    methods: BTreeMap<String, Method>,
}

impl InstanceKit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initializer. It runs once, on first construction only.
    #[must_use]
    pub fn with_init(mut self, init: impl FnOnce(&[Value]) -> VomResult<()> + 'static) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    #[must_use]
    pub fn with_method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&[Value]) -> VomResult<Value> + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Box::new(method));
        self
    }
}

impl fmt::Debug for InstanceKit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceKit")
            .field("init", &self.init.is_some())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Handle to the state of one virtual object.
///
/// Makers capture it in their methods. Reads and writes go straight to the
/// construction map while the object is being built, and through the
/// manager's cache afterwards, so a representative never holds its state
/// directly.
#[derive(Clone)]
pub struct State(Rc<StateInner>);

struct StateInner {
    vobj_id: String,
    kind: Rc<KindEntry>,
    manager: VirtualObjectManager,
    phase: RefCell<Phase>,
}

enum Phase {
    Initializing(BTreeMap<String, Value>),
    Active,
    /// Construction failed; the object does not exist.
    Abandoned,
}

impl State {
    fn initializing(vobj_id: &str, kind: Rc<KindEntry>, manager: VirtualObjectManager) -> Self {
        Self::with_phase(vobj_id, kind, manager, Phase::Initializing(BTreeMap::new()))
    }

    fn active(vobj_id: &str, kind: Rc<KindEntry>, manager: VirtualObjectManager) -> Self {
        Self::with_phase(vobj_id, kind, manager, Phase::Active)
    }

    fn with_phase(
        vobj_id: &str,
        kind: Rc<KindEntry>,
        manager: VirtualObjectManager,
        phase: Phase,
    ) -> Self {
        Self(Rc::new(StateInner {
            vobj_id: vobj_id.to_string(),
            kind,
            manager,
            phase: RefCell::new(phase),
        }))
    }

    #[must_use]
    pub fn vobj_id(&self) -> &str {
        &self.0.vobj_id
    }

    /// Whether the object's initializer has not finished yet.
    #[must_use]
    pub fn is_initializing(&self) -> bool {
        matches!(*self.0.phase.borrow(), Phase::Initializing(_))
    }

    /// Read a state property.
    pub fn get(&self, property: &str) -> VomResult<Value> {
        match &*self.0.phase.borrow() {
            Phase::Initializing(values) => {
                return values
                    .get(property)
                    .cloned()
                    .ok_or_else(|| self.unknown_property(property));
            }
            Phase::Abandoned => return Err(VomError::StateNotFound(self.0.vobj_id.clone())),
            Phase::Active => {}
        }
        self.0.manager.read_property(&self.0.vobj_id, property)
    }

    /// Write a state property.
    ///
    /// During construction any name may be assigned and becomes part of the
    /// object's shape. Afterwards only properties of the kind can be set and
    /// the value must be serializable.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> VomResult<()> {
        let value = value.into();
        match &mut *self.0.phase.borrow_mut() {
            Phase::Initializing(values) => {
                values.insert(property.to_string(), value);
                return Ok(());
            }
            Phase::Abandoned => return Err(VomError::StateNotFound(self.0.vobj_id.clone())),
            Phase::Active => {}
        }
        self.0
            .manager
            .write_property(&self.0.vobj_id, &self.0.kind, property, &value)
    }

    /// Property names: the construction map's keys while initializing, the
    /// kind's known properties afterwards.
    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        match &*self.0.phase.borrow() {
            Phase::Initializing(values) => values.keys().cloned().collect(),
            _ => self.0.kind.property_names(),
        }
    }

    fn unknown_property(&self, property: &str) -> VomError {
        VomError::UnknownProperty {
            vobj_id: self.0.vobj_id.clone(),
            property: property.to_string(),
        }
    }

    fn initial_values(&self) -> BTreeMap<String, Value> {
        match &*self.0.phase.borrow() {
            Phase::Initializing(values) => values.clone(),
            _ => BTreeMap::new(),
        }
    }

    fn enter(&self, phase: Phase) {
        *self.0.phase.borrow_mut() = phase;
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match &*self.0.phase.borrow() {
            Phase::Initializing(_) => "initializing",
            Phase::Active => "active",
            Phase::Abandoned => "abandoned",
        };
        f.debug_struct("State")
            .field("vobj_id", &self.0.vobj_id)
            .field("phase", &phase)
            .finish()
    }
}

// =============================================================================
// REPRESENTATIVE
// =============================================================================

/// The in-memory stand-in of a virtual object.
///
/// Clones share identity. At most one representative of a given vobjID is
/// live at a time; once every clone is dropped the object can be
/// reanimated into a new one.
#[derive(Clone)]
pub struct Representative(Rc<RepresentativeInner>);

pub(crate) struct RepresentativeInner {
    vobj_id: String,
    state: State,
    methods: BTreeMap<String, Method>,
}

impl Representative {
    fn new(vobj_id: &str, state: State, methods: BTreeMap<String, Method>) -> Self {
        Self(Rc::new(RepresentativeInner {
            vobj_id: vobj_id.to_string(),
            state,
            methods,
        }))
    }

    pub(crate) fn from_inner(inner: Rc<RepresentativeInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<RepresentativeInner> {
        Rc::downgrade(&self.0)
    }

    #[must_use]
    pub fn vobj_id(&self) -> &str {
        &self.0.vobj_id
    }

    #[must_use]
    pub fn state(&self) -> &State {
        &self.0.state
    }

    pub fn get(&self, property: &str) -> VomResult<Value> {
        self.0.state.get(property)
    }

    pub fn set(&self, property: &str, value: impl Into<Value>) -> VomResult<()> {
        self.0.state.set(property, value)
    }

    /// Call one of the kit's methods.
    pub fn invoke(&self, method: &str, args: &[Value]) -> VomResult<Value> {
        let behavior = self
            .0
            .methods
            .get(method)
            .ok_or_else(|| VomError::UnknownMethod {
                vobj_id: self.0.vobj_id.clone(),
                method: method.to_string(),
            })?;
        behavior(args)
    }

    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        self.0.methods.keys().map(String::as_str).collect()
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation.
    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Representative {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Representative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Representative")
            .field(&self.0.vobj_id)
            .finish()
    }
}

impl From<Representative> for Reference {
    fn from(rep: Representative) -> Self {
        Self::Virtual(rep)
    }
}

// =============================================================================
// KINDS
// =============================================================================

/// Registry entry of one kind.
pub(crate) struct KindEntry {
    kind_id: u64,
    next_instance: Cell<u64>,
    /// Union of every property name any instance was constructed with.
    property_names: RefCell<BTreeSet<String>>,
    maker: Box<dyn Fn(State) -> InstanceKit>,
}

impl KindEntry {
    pub(crate) fn new(
        kind_id: u64,
        first_instance: u64,
        maker: Box<dyn Fn(State) -> InstanceKit>,
    ) -> Self {
        Self {
            kind_id,
            next_instance: Cell::new(first_instance),
            property_names: RefCell::new(BTreeSet::new()),
            maker,
        }
    }

    fn allocate_instance(&self) -> u64 {
        let instance = self.next_instance.get();
        self.next_instance.set(instance.saturating_add(1));
        instance
    }

    fn declares(&self, property: &str) -> bool {
        self.property_names.borrow().contains(property)
    }

    fn property_names(&self) -> Vec<String> {
        self.property_names.borrow().iter().cloned().collect()
    }
}

impl fmt::Debug for KindEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindEntry")
            .field("kind_id", &self.kind_id)
            .field("next_instance", &self.next_instance.get())
            .field("property_names", &self.property_names.borrow())
            .finish_non_exhaustive()
    }
}

/// Constructor of new instances of one kind.
#[derive(Clone)]
pub struct KindMaker {
    kind: Rc<KindEntry>,
    manager: VirtualObjectManager,
}

impl KindMaker {
    pub(crate) fn new(kind: Rc<KindEntry>, manager: VirtualObjectManager) -> Self {
        Self { kind, manager }
    }

    #[must_use]
    pub fn kind_id(&self) -> u64 {
        self.kind.kind_id
    }

    /// Construct a new instance, passing `args` to the kit's initializer.
    pub fn make(&self, args: &[Value]) -> VomResult<Representative> {
        self.manager.make_new_instance(&self.kind, args)
    }
}

impl fmt::Debug for KindMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindMaker")
            .field("kind_id", &self.kind.kind_id)
            .finish()
    }
}

// =============================================================================
// CONSTRUCTION AND REANIMATION
// =============================================================================

impl VirtualObjectManager {
    fn make_new_instance(&self, kind: &Rc<KindEntry>, args: &[Value]) -> VomResult<Representative> {
        let vobj_id = make_virtual_slot(kind.kind_id, kind.allocate_instance());
        debug!(vobj_id = %vobj_id, "vo make");

        let state = State::initializing(&vobj_id, Rc::clone(kind), self.clone());
        let InstanceKit { init, methods } = (kind.maker)(state.clone());
        {
            let mut core = self.core.borrow_mut();
            let core = &mut *core;
            if let Err(e) = core
                .cache
                .remember(InnerSelf::under_construction(&vobj_id), core.store.as_mut())
            {
                state.enter(Phase::Abandoned);
                return Err(e);
            }
        }
        let rep = Representative::new(&vobj_id, state.clone(), methods);

        if let Some(init) = init {
            if let Err(e) = init(args) {
                self.abort_construction(&state, &e);
                return Err(e);
            }
        }

        let initial = state.initial_values();
        let mut raw = RawState::new();
        let mut stored_slots = Vec::new();
        for (property, value) in &initial {
            match marshal::serialize(value) {
                Ok(data) => {
                    stored_slots.extend(data.slots.iter().cloned());
                    raw.insert(property.clone(), data);
                }
                Err(e) => {
                    let e = VomError::UnserializableProperty {
                        property: property.clone(),
                        reason: e.to_string(),
                    };
                    self.abort_construction(&state, &e);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.finish_construction(&rep, raw, &stored_slots) {
            self.abort_construction(&state, &e);
            return Err(e);
        }
        kind.property_names
            .borrow_mut()
            .extend(initial.into_keys());
        state.enter(Phase::Active);
        Ok(rep)
    }

    fn finish_construction(
        &self,
        rep: &Representative,
        raw: RawState,
        stored_slots: &[String],
    ) -> VomResult<()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.tracker.add_reachable_slots(
            stored_slots,
            core.store.as_mut(),
            &mut core.slots,
            &mut core.cache,
        )?;
        let inner = core.cache.lookup(rep.vobj_id(), false, core.store.as_mut())?;
        inner.under_construction = false;
        inner.raw_data = Some(raw);
        inner.dirty = true;
        inner.set_representative(rep);
        core.slots
            .register(rep.vobj_id(), &Reference::Virtual(rep.clone()));
        Ok(())
    }

    fn abort_construction(&self, state: &State, error: &VomError) {
        warn!(vobj_id = %state.vobj_id(), error = %error, "vo construction aborted");
        self.core.borrow_mut().cache.forget(state.vobj_id());
        state.enter(Phase::Abandoned);
    }

    /// Produce the representative of an existing virtual object.
    ///
    /// Runs the kind's maker over the object's stored state. With
    /// `pro_forma` the maker is run but its product discarded and `None`
    /// returned; otherwise the new representative is registered as the
    /// object's live value. Fails if a representative is already live.
    pub fn make_virtual_object_representative(
        &self,
        vobj_id: &str,
        pro_forma: bool,
    ) -> VomResult<Option<Representative>> {
        let slot = parse_vat_slot(vobj_id)?;
        if !slot.is_virtual() {
            return Err(VomError::InvalidSlot(vobj_id.to_string()));
        }
        let kind = {
            let mut core = self.core.borrow_mut();
            let core = &mut *core;
            let kind = core
                .kinds
                .get(&slot.id)
                .cloned()
                .ok_or_else(|| VomError::UnknownKind(slot.id.to_string()))?;
            if !pro_forma && core.slots.contains_live(vobj_id) {
                return Err(VomError::AlreadyRepresented(vobj_id.to_string()));
            }
            let inner = core.cache.lookup(vobj_id, false, core.store.as_mut())?;
            if inner.under_construction {
                return Err(VomError::StillInitializing(vobj_id.to_string()));
            }
            if !pro_forma && inner.rep_count() > 0 {
                return Err(VomError::AlreadyRepresented(vobj_id.to_string()));
            }
            kind
        };

        let state = State::active(vobj_id, Rc::clone(&kind), self.clone());
        let InstanceKit { methods, .. } = (kind.maker)(state.clone());
        if pro_forma {
            return Ok(None);
        }
        let rep = Representative::new(vobj_id, state, methods);
        {
            let mut core = self.core.borrow_mut();
            core.slots
                .register(vobj_id, &Reference::Virtual(rep.clone()));
            if let Some(inner) = core.cache.get_mut(vobj_id) {
                inner.set_representative(&rep);
            }
        }
        debug!(vobj_id = %vobj_id, "vo reanimate");
        Ok(Some(rep))
    }

    fn read_property(&self, vobj_id: &str, property: &str) -> VomResult<Value> {
        let data = {
            let mut core = self.core.borrow_mut();
            let core = &mut *core;
            let inner = core.cache.lookup(vobj_id, true, core.store.as_mut())?;
            if inner.under_construction {
                return Err(VomError::StillInitializing(vobj_id.to_string()));
            }
            inner
                .raw_data
                .as_ref()
                .and_then(|raw| raw.get(property))
                .cloned()
                .ok_or_else(|| VomError::UnknownProperty {
                    vobj_id: vobj_id.to_string(),
                    property: property.to_string(),
                })?
        };
        self.unserialize(&data)
    }

    fn write_property(
        &self,
        vobj_id: &str,
        kind: &KindEntry,
        property: &str,
        value: &Value,
    ) -> VomResult<()> {
        let data = marshal::serialize(value)?;
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        {
            let inner = core.cache.lookup(vobj_id, true, core.store.as_mut())?;
            if inner.under_construction {
                return Err(VomError::StillInitializing(vobj_id.to_string()));
            }
            let stored = inner
                .raw_data
                .as_ref()
                .is_some_and(|raw| raw.contains_key(property));
            if !stored && !kind.declares(property) {
                return Err(VomError::UnknownProperty {
                    vobj_id: vobj_id.to_string(),
                    property: property.to_string(),
                });
            }
        }
        core.tracker.add_reachable_slots(
            &data.slots,
            core.store.as_mut(),
            &mut core.slots,
            &mut core.cache,
        )?;
        let inner = core
            .cache
            .get_mut(vobj_id)
            .ok_or_else(|| VomError::StateNotFound(vobj_id.to_string()))?;
        inner
            .raw_data
            .get_or_insert_with(RawState::new)
            .insert(property.to_string(), data);
        inner.dirty = true;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
