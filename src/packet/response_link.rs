use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// An opaque handle identifying where the reply to an inbound packet must be delivered, e.g. a
///  connection or a pending HTTP response. The queue only carries it around; the transport
///  that created it gets it back via [ResponseLink::downcast_ref].
#[derive(Clone)]
pub struct ResponseLink(Arc<dyn Any + Send + Sync>);

impl ResponseLink {
    pub fn new<T: Any + Send + Sync>(link: T) -> ResponseLink {
        ResponseLink(Arc::new(link))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl Debug for ResponseLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResponseLink{{{:p}}}", Arc::as_ptr(&self.0))
    }
}
