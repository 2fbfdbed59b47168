/*!

The runtime machinery: the value universe, the tag forest, the shape registry and morph engine,
frames and scopes, the handle lifecycle, function families, the module registry, and the
pipeline evaluator.

Values form a sealed tagged union. The dynamic-language original dispatched on an object's class;
here every operation matches on the enum discriminant instead:

|                | dynamic original              | comp-core                   |
|:---------------|:------------------------------|:----------------------------|
| value kind     | implicit via class            | enum variant                |
| shared impl    | base-class methods            | enum impl                   |
| specialization | virtual dispatch              | match on variant in impl    |
| handle set     | recomputed on demand          | cached `NatSet` per value   |
| frames         | host call stack               | index-linked arena          |

*/

pub mod eval;
pub mod fail;
pub mod frame;
pub mod function;
pub mod handle;
pub mod module;
pub mod morph;
pub mod shape;
pub mod tag;
pub mod value;
