//! Translators: reversible, I/O-free conversions between a rich type and a
//! storable shape.

use std::{marker::PhantomData, sync::Arc};

use ghostdex_common::Result;

use crate::value::Value;

/// Converts between `A` and `B`. For every `a`, `rev(app(a)) == a`.
///
/// `rev` fails with a format error when `b` is not something `app` could have
/// produced.
pub trait Translator<A, B>: Send + Sync {
    fn app(&self, a: &A) -> Result<B>;

    fn rev(&self, b: &B) -> Result<A>;
}

impl<A, B, T: Translator<A, B> + ?Sized> Translator<A, B> for Arc<T> {
    fn app(&self, a: &A) -> Result<B> {
        (**self).app(a)
    }

    fn rev(&self, b: &B) -> Result<A> {
        (**self).rev(b)
    }
}

/// The no-op translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: Clone> Translator<T, T> for Identity {
    fn app(&self, a: &T) -> Result<T> {
        Ok(a.clone())
    }

    fn rev(&self, b: &T) -> Result<T> {
        Ok(b.clone())
    }
}

/// `first` then `second`: `A -> B -> C`.
pub struct Then<X, Y, B> {
    first: X,
    second: Y,
    _mid: PhantomData<fn() -> B>,
}

impl<X, Y, B> Then<X, Y, B> {
    pub fn new(first: X, second: Y) -> Self {
        Then {
            first,
            second,
            _mid: PhantomData,
        }
    }
}

impl<A, B, C, X, Y> Translator<A, C> for Then<X, Y, B>
where
    X: Translator<A, B>,
    Y: Translator<B, C>,
{
    fn app(&self, a: &A) -> Result<C> {
        self.second.app(&self.first.app(a)?)
    }

    fn rev(&self, c: &C) -> Result<A> {
        self.first.rev(&self.second.rev(c)?)
    }
}

/// Strings as `Value::String`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringValue;

impl Translator<String, Value> for StringValue {
    fn app(&self, a: &String) -> Result<Value> {
        Ok(Value::String(a.clone()))
    }

    fn rev(&self, b: &Value) -> Result<String> {
        b.as_str("key").map(str::to_string)
    }
}

impl Translator<Arc<str>, Value> for StringValue {
    fn app(&self, a: &Arc<str>) -> Result<Value> {
        Ok(Value::String(a.to_string()))
    }

    fn rev(&self, b: &Value) -> Result<Arc<str>> {
        b.as_str("key").map(Arc::from)
    }
}

/// Integers as `Value::Int`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntValue;

impl Translator<i64, Value> for IntValue {
    fn app(&self, a: &i64) -> Result<Value> {
        Ok(Value::Int(*a))
    }

    fn rev(&self, b: &Value) -> Result<i64> {
        b.as_int("key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl Translator<i64, i64> for Doubler {
        fn app(&self, a: &i64) -> Result<i64> {
            Ok(a * 2)
        }

        fn rev(&self, b: &i64) -> Result<i64> {
            Ok(b / 2)
        }
    }

    #[test]
    fn test_identity() {
        let v = Value::from("x");
        let t = Identity;
        assert_eq!(Translator::<Value, Value>::app(&t, &v).unwrap(), v);
        assert_eq!(Translator::<Value, Value>::rev(&t, &v).unwrap(), v);
    }

    #[test]
    fn test_then_composes_both_ways() {
        let t = Then::<_, _, i64>::new(Doubler, IntValue);
        assert_eq!(t.app(&21).unwrap(), Value::Int(42));
        assert_eq!(t.rev(&Value::Int(42)).unwrap(), 21);
    }

    #[test]
    fn test_string_value() {
        let key: Arc<str> = Arc::from("ghost");
        let v = StringValue.app(&key).unwrap();
        let back: Arc<str> = StringValue.rev(&v).unwrap();
        assert_eq!(back, key);
        let bad: Result<String> = StringValue.rev(&Value::Int(1));
        assert!(bad.unwrap_err().is_invalid_format());
    }
}
