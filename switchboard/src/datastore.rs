use std::any::Any;

use crate::channel::Channel;

/// Inheritance count that never runs out.
pub const INHERIT_FOREVER: u32 = u32::MAX;

pub type DatastoreData = Box<dyn Any + Send + Sync>;

/// Describes one kind of datastore. Kinds are matched by name.
pub trait DatastoreInfo: Send + Sync {
    fn name(&self) -> &'static str;

    /// Copy for a child channel, `None` keeps the datastore on the parent only.
    fn duplicate(&self, _data: &(dyn Any + Send + Sync)) -> Option<DatastoreData> {
        None
    }

    fn destroy(&self, _data: DatastoreData) {}

    /// Called when a masquerade moves the datastore from `old` to `new`.
    fn chan_fixup(&self, _data: &mut (dyn Any + Send + Sync), _old: &Channel, _new: &Channel) {}
}

pub struct Datastore {
    info: &'static dyn DatastoreInfo,
    pub uid: Option<String>,
    pub inheritance: u32,
    data: Option<DatastoreData>,
}

impl Datastore {
    pub fn new<T: Any + Send + Sync>(
        info: &'static dyn DatastoreInfo,
        uid: Option<&str>,
        data: T,
    ) -> Self {
        Self {
            info,
            uid: uid.map(|u| u.to_string()),
            inheritance: 0,
            data: Some(Box::new(data)),
        }
    }

    pub fn inherited(mut self, inheritance: u32) -> Self {
        self.inheritance = inheritance;
        self
    }

    pub fn info(&self) -> &'static dyn DatastoreInfo {
        self.info
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref()?.downcast_ref()
    }

    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.as_deref_mut()?.downcast_mut()
    }

    fn matches(&self, info: &dyn DatastoreInfo, uid: Option<&str>) -> bool {
        self.info.name() == info.name() && (uid.is_none() || self.uid.as_deref() == uid)
    }

    fn countdown(inheritance: u32) -> u32 {
        if inheritance == INHERIT_FOREVER {
            INHERIT_FOREVER
        } else {
            inheritance.saturating_sub(1)
        }
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.info.destroy(data);
        }
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("info", &self.info.name())
            .field("uid", &self.uid)
            .field("inheritance", &self.inheritance)
            .finish()
    }
}

/// Ordered list of datastores attached to a channel.
#[derive(Debug, Default)]
pub struct DatastoreList {
    stores: Vec<Datastore>,
}

impl DatastoreList {
    pub fn add(&mut self, datastore: Datastore) {
        self.stores.push(datastore);
    }

    pub fn remove(&mut self, info: &dyn DatastoreInfo, uid: Option<&str>) -> Option<Datastore> {
        let pos = self.stores.iter().position(|d| d.matches(info, uid))?;
        Some(self.stores.remove(pos))
    }

    /// First datastore of kind `info`, and with `uid` when one is given.
    pub fn find(&self, info: &dyn DatastoreInfo, uid: Option<&str>) -> Option<&Datastore> {
        self.stores.iter().find(|d| d.matches(info, uid))
    }

    pub fn find_mut(
        &mut self,
        info: &dyn DatastoreInfo,
        uid: Option<&str>,
    ) -> Option<&mut Datastore> {
        self.stores.iter_mut().find(|d| d.matches(info, uid))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datastore> {
        self.stores.iter()
    }

    pub fn clear(&mut self) {
        self.stores.clear();
    }

    /// Copies handed to a child channel.
    pub fn inherit(&self) -> Vec<Datastore> {
        self.stores
            .iter()
            .filter(|d| d.inheritance > 0)
            .filter_map(|d| {
                let data = d.info.duplicate(d.data.as_deref()?)?;
                Some(Datastore {
                    info: d.info,
                    uid: d.uid.clone(),
                    inheritance: Datastore::countdown(d.inheritance),
                    data: Some(data),
                })
            })
            .collect()
    }

    /// Empties the list for a masquerade. Datastores with inheritance left
    /// are fixed up for `new` and returned, the rest are destroyed.
    pub fn take_for_masquerade(&mut self, old: &Channel, new: &Channel) -> Vec<Datastore> {
        let mut moved = Vec::new();
        for mut store in self.stores.drain(..) {
            if store.inheritance == 0 {
                continue;
            }
            if let Some(data) = store.data.as_deref_mut() {
                store.info.chan_fixup(data, old, new);
            }
            store.inheritance = Datastore::countdown(store.inheritance);
            moved.push(store);
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::local::LocalTech;

    struct Volume;

    impl DatastoreInfo for Volume {
        fn name(&self) -> &'static str {
            "volume"
        }

        fn duplicate(&self, data: &(dyn Any + Send + Sync)) -> Option<DatastoreData> {
            let level = data.downcast_ref::<i32>()?;
            Some(Box::new(*level))
        }
    }

    static VOLUME: Volume = Volume;

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl DatastoreInfo for Counted {
        fn name(&self) -> &'static str {
            "counted"
        }

        fn destroy(&self, _data: DatastoreData) {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        }
    }

    static COUNTED: Counted = Counted;

    struct Owner;

    impl DatastoreInfo for Owner {
        fn name(&self) -> &'static str {
            "owner"
        }

        fn chan_fixup(&self, data: &mut (dyn Any + Send + Sync), _old: &Channel, new: &Channel) {
            if let Some(owner) = data.downcast_mut::<String>() {
                *owner = new.name();
            }
        }
    }

    static OWNER: Owner = Owner;

    #[test]
    fn find_by_uid() {
        let mut list = DatastoreList::default();
        list.add(Datastore::new(&VOLUME, Some("rx"), 3i32));
        list.add(Datastore::new(&VOLUME, Some("tx"), -2i32));

        assert_eq!(list.find(&VOLUME, None).unwrap().data::<i32>(), Some(&3));
        assert_eq!(list.find(&VOLUME, Some("tx")).unwrap().data::<i32>(), Some(&-2));
        assert!(list.find(&VOLUME, Some("other")).is_none());
        assert!(list.find(&OWNER, None).is_none());

        *list.find_mut(&VOLUME, Some("tx")).unwrap().data_mut::<i32>().unwrap() = 7;
        assert_eq!(list.find(&VOLUME, Some("tx")).unwrap().data::<i32>(), Some(&7));

        assert!(list.remove(&VOLUME, Some("rx")).is_some());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn destroy_runs_once() {
        let before = DESTROYED.load(Ordering::SeqCst);
        let mut list = DatastoreList::default();
        list.add(Datastore::new(&COUNTED, None, ()));
        list.add(Datastore::new(&COUNTED, None, ()));
        drop(list.remove(&COUNTED, None));
        assert_eq!(DESTROYED.load(Ordering::SeqCst), before + 1);
        list.clear();
        assert_eq!(DESTROYED.load(Ordering::SeqCst), before + 2);
    }

    #[test]
    fn child_inheritance() {
        let mut list = DatastoreList::default();
        list.add(Datastore::new(&VOLUME, Some("once"), 1i32).inherited(1));
        list.add(Datastore::new(&VOLUME, Some("forever"), 2i32).inherited(INHERIT_FOREVER));
        list.add(Datastore::new(&VOLUME, Some("never"), 3i32));
        // no duplicate hook, stays with the parent
        list.add(Datastore::new(&OWNER, None, String::new()).inherited(5));

        let child = list.inherit();
        assert_eq!(child.len(), 2);
        assert_eq!(child[0].uid.as_deref(), Some("once"));
        assert_eq!(child[0].inheritance, 0);
        assert_eq!(child[1].inheritance, INHERIT_FOREVER);
        assert_eq!(child[1].data::<i32>(), Some(&2));
    }

    #[test]
    fn masquerade_fixup() {
        let old = LocalTech::channel("Local/old");
        let new = LocalTech::channel("Local/new");
        let mut list = DatastoreList::default();
        list.add(Datastore::new(&OWNER, None, old.name()).inherited(2));
        list.add(Datastore::new(&VOLUME, None, 4i32));

        let moved = list.take_for_masquerade(&old, &new);
        assert!(list.is_empty());
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].inheritance, 1);
        assert_eq!(moved[0].data::<String>().map(|s| s.as_str()), Some("Local/new"));
    }
}
