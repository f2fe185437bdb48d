/// An implementation of recycling for thingbuf which works with `Option`.
///
/// Emptied slots go back to `None`.  Queues of completed buffers only need empty slots, and a slot must not keep a
/// buffer alive after it has been handed out.
#[derive(Default)]
pub(crate) struct OptionRecycler;

impl<T> thingbuf::recycling::Recycle<Option<T>> for OptionRecycler {
    fn new_element(&self) -> Option<T> {
        None
    }

    fn recycle(&self, element: &mut Option<T>) {
        *element = None;
    }
}
