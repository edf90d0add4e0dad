// src/interp.rs
//
// Interpolation classes and the routine selection they drive.
//
// Each input of a multi-input operator is classified by how its samples
// must be read at the operator's rate. The classes form a dominance order,
// and the tuple of classes packs into a composite code that picks, once at
// construction, the specialized routine the operator runs.

use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::sound::Sound;

/// Bits per class in a composite code.
pub const INTERP_SHIFT: u32 = 2;
pub const INTERP_MASK: u32 = 3;

/// Largest supported operator arity.
pub const MAX_ARITY: usize = 8;

/// How an input is read, ordered by dominance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum InterpClass {
    /// Same rate, used as is.
    None = 0,
    /// Sample and hold.
    Step = 1,
    /// Linear interpolation.
    Interpolate = 2,
    /// Linear ramp between control points.
    Ramp = 3,
}

impl InterpClass {
    pub const ALL: [InterpClass; 4] = [
        InterpClass::None,
        InterpClass::Step,
        InterpClass::Interpolate,
        InterpClass::Ramp,
    ];

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Self {
        Self::ALL[(code & INTERP_MASK) as usize]
    }

    pub fn letter(self) -> char {
        match self {
            InterpClass::None => 'n',
            InterpClass::Step => 's',
            InterpClass::Interpolate => 'i',
            InterpClass::Ramp => 'r',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'n' => Some(InterpClass::None),
            's' => Some(InterpClass::Step),
            'i' => Some(InterpClass::Interpolate),
            'r' => Some(InterpClass::Ramp),
            _ => None,
        }
    }
}

/// Class of `snd` read by an operator running at `sr`.
pub fn interp_style(snd: &Sound, sr: f64) -> InterpClass {
    let input_sr = snd.srate();
    if input_sr == sr {
        InterpClass::None
    } else if input_sr < sr {
        InterpClass::Ramp
    } else {
        InterpClass::Interpolate
    }
}

/// Packed tuple of classes, first input in the low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterpCode {
    code: u32,
    arity: usize,
}

impl InterpCode {
    pub fn pack(classes: &[InterpClass]) -> EngineResult<Self> {
        let arity = classes.len();
        let code = classes
            .iter()
            .rev()
            .fold(0, |acc, c| (acc << INTERP_SHIFT) | c.code());
        if arity == 0 || arity > MAX_ARITY {
            return Err(EngineError::UnsupportedInterpolationCombination { arity, code });
        }
        Ok(Self { code, arity })
    }

    pub fn from_raw(code: u32, arity: usize) -> EngineResult<Self> {
        if arity == 0 || arity > MAX_ARITY || code >> (INTERP_SHIFT * arity as u32) != 0 {
            return Err(EngineError::UnsupportedInterpolationCombination { arity, code });
        }
        Ok(Self { code, arity })
    }

    /// Parse a letter string such as `"nsi"`, first input first.
    pub fn from_letters(letters: &str) -> EngineResult<Self> {
        let classes = letters
            .chars()
            .map(|c| {
                InterpClass::from_letter(c)
                    .ok_or_else(|| EngineError::InvalidArgument(format!("interpolation class {c:?}")))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Self::pack(&classes)
    }

    #[inline]
    pub fn code(&self) -> u32 {
        self.code
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn class_at(&self, index: usize) -> InterpClass {
        InterpClass::from_code(self.code >> (INTERP_SHIFT * index as u32))
    }

    pub fn classes(&self) -> Vec<InterpClass> {
        (0..self.arity).map(|i| self.class_at(i)).collect()
    }

    /// The most demanding class among the inputs.
    pub fn dominant(&self) -> InterpClass {
        self.classes().into_iter().max().unwrap_or(InterpClass::None)
    }
}

impl fmt::Display for InterpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in self.classes() {
            write!(f, "{}", class.letter())?;
        }
        Ok(())
    }
}

/// The combinations the classic unit generators provide routines for, per
/// arity. The first input is a signal (none or step); up to three inputs may
/// take any class after it; wider operators are restricted to uniform or
/// step-mixed signals.
pub fn standard_combinations(arity: usize) -> Vec<InterpCode> {
    let ns = [InterpClass::None, InterpClass::Step];

    let tuples: Vec<Vec<InterpClass>> = match arity {
        1 => InterpClass::ALL.iter().map(|c| vec![*c]).collect(),
        2 | 3 => {
            let mut out: Vec<Vec<InterpClass>> = ns.iter().map(|c| vec![*c]).collect();
            for _ in 1..arity {
                out = out
                    .into_iter()
                    .flat_map(|t| {
                        InterpClass::ALL.iter().map(move |c| {
                            let mut t = t.clone();
                            t.push(*c);
                            t
                        })
                    })
                    .collect();
            }
            out
        }
        4 => {
            let mut out: Vec<Vec<InterpClass>> = (0..16u32)
                .map(|bits| (0..4).map(|i| ns[((bits >> (3 - i)) & 1) as usize]).collect())
                .collect();
            for first in ns {
                for rest in [InterpClass::Interpolate, InterpClass::Ramp] {
                    out.push(vec![first, rest, rest, rest]);
                }
            }
            out
        }
        5..=MAX_ARITY => ns.iter().map(|c| vec![*c; arity]).collect(),
        _ => Vec::new(),
    };

    tuples
        .iter()
        .filter_map(|t| InterpCode::pack(t).ok())
        .collect()
}

/// Routines of one operator, indexed by composite code.
pub struct RoutineTable<R> {
    arity: usize,
    routines: HashMap<u32, R>,
}

impl<R: Copy> RoutineTable<R> {
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            routines: HashMap::new(),
        }
    }

    pub fn bind(mut self, letters: &str, routine: R) -> EngineResult<Self> {
        let code = InterpCode::from_letters(letters)?;
        self.bind_code(code, routine)?;
        Ok(self)
    }

    pub fn bind_code(&mut self, code: InterpCode, routine: R) -> EngineResult<()> {
        if code.arity() != self.arity {
            return Err(EngineError::InvalidArgument(format!(
                "routine for {} inputs bound in a table for {}",
                code.arity(),
                self.arity
            )));
        }
        self.routines.insert(code.code(), routine);
        Ok(())
    }

    pub fn select(&self, code: InterpCode) -> EngineResult<R> {
        self.routines
            .get(&code.code())
            .filter(|_| code.arity() == self.arity)
            .copied()
            .ok_or(EngineError::UnsupportedInterpolationCombination {
                arity: code.arity(),
                code: code.code(),
            })
    }

    /// Pack and select.
    pub fn resolve(&self, classes: &[InterpClass]) -> EngineResult<R> {
        self.select(InterpCode::pack(classes)?)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}
